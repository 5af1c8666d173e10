use super::Entity;
use crate::{
    error::{is_unique_violation, AppError},
    loan::{due_date, extended_due_date, today, CirculationError, Copies},
    models::{Borrowing, PaymentMethod, Reservation, Transaction, TransactionKind},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction as DbTransaction};
use tracing::{info, instrument};

/// Audit details written alongside an inventory change.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub staff_id: Option<i64>,
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub note: String,
}

#[derive(Debug, sqlx::FromRow)]
struct Stock {
    id: i64,
    total_copies: i32,
    available_copies: i32,
}

impl Entity {
    #[instrument(skip(self))]
    pub async fn borrow(&self, book_id: i64, user_id: i64) -> Result<Borrowing, AppError> {
        let mut tx = self.pool.begin().await?;
        let (borrowing, _) = checkout(&mut tx, book_id, user_id, &Entry::default()).await?;
        tx.commit().await?;

        info!(borrowing_id = borrowing.id, due_date = %borrowing.due_date, "book borrowed");
        Ok(borrowing)
    }

    #[instrument(skip(self))]
    pub async fn return_borrowing(
        &self,
        borrowing_id: i64,
        user_id: i64,
    ) -> Result<Borrowing, AppError> {
        let mut tx = self.pool.begin().await?;
        let (borrowing, _) = checkin(&mut tx, borrowing_id, user_id, &Entry::default()).await?;
        tx.commit().await?;

        info!(book_id = borrowing.book_id, "book returned");
        Ok(borrowing)
    }

    #[instrument(skip(self))]
    pub async fn extend(
        &self,
        borrowing_id: i64,
        user_id: i64,
        days: i64,
    ) -> Result<Borrowing, AppError> {
        let mut tx = self.pool.begin().await?;

        let borrowing: Borrowing = sqlx::query_as(
            "SELECT * FROM borrowings WHERE id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(borrowing_id)
        .bind(user_id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(AppError::NotFound("borrowing"))?;

        let due = extended_due_date(&borrowing, today(), days)?;

        let borrowing: Borrowing = sqlx::query_as(
            "UPDATE borrowings SET due_date = $2, extended = TRUE WHERE id = $1 RETURNING *",
        )
        .bind(borrowing.id)
        .bind(due)
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;

        info!(due_date = %borrowing.due_date, "borrowing extended");
        Ok(borrowing)
    }

    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        book_id: i64,
        user_id: i64,
        reserved_for: NaiveDate,
    ) -> Result<Reservation, AppError> {
        let mut tx = self.pool.begin().await?;
        let (reservation, _) =
            reserve_in(&mut tx, book_id, user_id, reserved_for, &Entry::default()).await?;
        tx.commit().await?;

        info!(reservation_id = reservation.id, "book reserved");
        Ok(reservation)
    }

    // staff-side variants, recorded with the acting staff member and their note

    pub(super) async fn borrow_for(
        &self,
        book_id: i64,
        user_id: i64,
        entry: &Entry,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.pool.begin().await?;
        let (_, record) = checkout(&mut tx, book_id, user_id, entry).await?;
        tx.commit().await?;
        Ok(record)
    }

    pub(super) async fn return_for(
        &self,
        book_id: i64,
        user_id: i64,
        entry: &Entry,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.pool.begin().await?;

        let borrowing_id: i64 = sqlx::query_scalar(
            "SELECT id FROM borrowings WHERE book_id = $1 AND user_id = $2 AND NOT returned",
        )
        .bind(book_id)
        .bind(user_id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(AppError::NotFound("open borrowing"))?;

        let (_, record) = checkin(&mut tx, borrowing_id, user_id, entry).await?;
        tx.commit().await?;
        Ok(record)
    }

    pub(super) async fn reserve_for(
        &self,
        book_id: i64,
        user_id: i64,
        reserved_for: NaiveDate,
        entry: &Entry,
    ) -> Result<Transaction, AppError> {
        let mut tx = self.pool.begin().await?;
        let (_, record) = reserve_in(&mut tx, book_id, user_id, reserved_for, entry).await?;
        tx.commit().await?;
        Ok(record)
    }

    #[cfg(test)]
    pub(super) async fn book_stock(&self, book_id: i64) -> Result<(i32, i32), AppError> {
        let stock: (i32, i32) =
            sqlx::query_as("SELECT total_copies, available_copies FROM books WHERE id = $1")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(stock)
    }
}

// Held until the enclosing transaction ends; every counter change goes through here first.
async fn lock_book(tx: &mut DbTransaction<'_, Postgres>, book_id: i64) -> Result<Stock, AppError> {
    let stock: Stock = sqlx::query_as(
        "SELECT id, total_copies, available_copies FROM books WHERE id = $1 FOR UPDATE",
    )
    .bind(book_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("book"))?;
    Ok(stock)
}

async fn set_available(
    tx: &mut DbTransaction<'_, Postgres>,
    stock: &Stock,
    copies: Copies,
) -> Result<(), AppError> {
    sqlx::query("UPDATE books SET available_copies = $2 WHERE id = $1")
        .bind(stock.id)
        .bind(copies.available())
        .execute(&mut *tx)
        .await?;
    Ok(())
}

async fn has_open_borrowing(
    tx: &mut DbTransaction<'_, Postgres>,
    book_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let open: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT 1 FROM borrowings WHERE book_id = $1 AND user_id = $2 AND NOT returned
        )",
    )
    .bind(book_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    Ok(open)
}

pub(super) async fn record(
    tx: &mut DbTransaction<'_, Postgres>,
    user_id: i64,
    book_id: Option<i64>,
    kind: TransactionKind,
    entry: &Entry,
) -> Result<Transaction, AppError> {
    let record: Transaction = sqlx::query_as(
        "INSERT INTO transactions (user_id, book_id, staff_id, kind, amount, payment_method, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *",
    )
    .bind(user_id)
    .bind(book_id)
    .bind(entry.staff_id)
    .bind(kind)
    .bind(entry.amount)
    .bind(entry.payment_method)
    .bind(&entry.note)
    .fetch_one(&mut *tx)
    .await?;
    Ok(record)
}

async fn checkout(
    tx: &mut DbTransaction<'_, Postgres>,
    book_id: i64,
    user_id: i64,
    entry: &Entry,
) -> Result<(Borrowing, Transaction), AppError> {
    let stock = lock_book(tx, book_id).await?;

    if has_open_borrowing(tx, book_id, user_id).await? {
        return Err(CirculationError::AlreadyBorrowed.into());
    }

    let copies = Copies::new(stock.total_copies, stock.available_copies)?.checkout()?;
    set_available(tx, &stock, copies).await?;

    let borrowed_on = today();
    let borrowing: Borrowing = sqlx::query_as(
        "INSERT INTO borrowings (book_id, user_id, borrow_date, due_date)
        VALUES ($1, $2, $3, $4)
        RETURNING *",
    )
    .bind(book_id)
    .bind(user_id)
    .bind(borrowed_on)
    .bind(due_date(borrowed_on))
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE reservations SET fulfilled = TRUE
        WHERE book_id = $1 AND user_id = $2 AND NOT fulfilled",
    )
    .bind(book_id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    let record = record(tx, user_id, Some(book_id), TransactionKind::Borrow, entry).await?;
    Ok((borrowing, record))
}

async fn checkin(
    tx: &mut DbTransaction<'_, Postgres>,
    borrowing_id: i64,
    user_id: i64,
    entry: &Entry,
) -> Result<(Borrowing, Transaction), AppError> {
    // book row is locked before the borrowing row, same order as checkout
    let book_id: i64 =
        sqlx::query_scalar("SELECT book_id FROM borrowings WHERE id = $1 AND user_id = $2")
            .bind(borrowing_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("borrowing"))?;

    let stock = lock_book(tx, book_id).await?;

    let borrowing: Borrowing = sqlx::query_as("SELECT * FROM borrowings WHERE id = $1 FOR UPDATE")
        .bind(borrowing_id)
        .fetch_one(&mut *tx)
        .await?;
    if borrowing.returned {
        return Err(CirculationError::AlreadyReturned.into());
    }

    let copies = Copies::new(stock.total_copies, stock.available_copies)?.checkin()?;
    set_available(tx, &stock, copies).await?;

    let borrowing: Borrowing = sqlx::query_as(
        "UPDATE borrowings SET returned = TRUE, return_date = $2 WHERE id = $1 RETURNING *",
    )
    .bind(borrowing.id)
    .bind(today())
    .fetch_one(&mut *tx)
    .await?;

    let record = record(tx, user_id, Some(book_id), TransactionKind::Return, entry).await?;
    Ok((borrowing, record))
}

async fn reserve_in(
    tx: &mut DbTransaction<'_, Postgres>,
    book_id: i64,
    user_id: i64,
    reserved_for: NaiveDate,
    entry: &Entry,
) -> Result<(Reservation, Transaction), AppError> {
    lock_book(tx, book_id).await?;

    if has_open_borrowing(tx, book_id, user_id).await? {
        return Err(CirculationError::AlreadyBorrowed.into());
    }

    let reservation: Reservation = sqlx::query_as(
        "INSERT INTO reservations (book_id, user_id, reserved_for)
        VALUES ($1, $2, $3)
        RETURNING *",
    )
    .bind(book_id)
    .bind(user_id)
    .bind(reserved_for)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            AppError::Circulation(CirculationError::AlreadyReserved)
        } else {
            AppError::Database(err)
        }
    })?;

    let record = record(tx, user_id, Some(book_id), TransactionKind::Reservation, entry).await?;
    Ok((reservation, record))
}
