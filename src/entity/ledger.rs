use super::{circulation::record, page_bounds, Entity, Entry, BORROWING_VIEW_SELECT};
use crate::{
    error::{is_foreign_key_violation, AppError},
    input::{FieldErrors, PageQuery, ReportQuery, TransactionData},
    loan::today,
    models::{
        BookCount, BorrowingView, Dashboard, KindCount, Report, Transaction, TransactionChunk,
        TransactionKind, User,
    },
};
use rust_decimal::Decimal;
use tracing::{info, instrument};

const RECENT_TRANSACTIONS: i64 = 10;
const TOP_BOOKS: i64 = 5;

// only fines carry money; inventory rows are always zero-amount
fn staff_entry(staff_id: i64, data: &TransactionData) -> Entry {
    let (amount, payment_method) = match data.kind {
        TransactionKind::Fine => (data.amount, data.payment_method),
        _ => (Decimal::ZERO, None),
    };
    Entry {
        staff_id: Some(staff_id),
        amount,
        payment_method,
        note: data.note.trim().to_string(),
    }
}

impl Entity {
    /// Records a transaction on behalf of a reader. Inventory kinds run the same locked
    /// checkout/checkin as the self-service endpoints.
    #[instrument(skip(self, data), fields(kind = ?data.kind, user_id = data.user_id))]
    pub async fn transaction_create(
        &self,
        staff_id: i64,
        data: &TransactionData,
    ) -> Result<Transaction, AppError> {
        let entry = staff_entry(staff_id, data);
        let book_id = || {
            data.book_id
                .ok_or_else(|| FieldErrors::single("book_id", "Book is required"))
        };

        let transaction = match data.kind {
            TransactionKind::Borrow => self.borrow_for(book_id()?, data.user_id, &entry).await?,
            TransactionKind::Return => self.return_for(book_id()?, data.user_id, &entry).await?,
            TransactionKind::Reservation => {
                let today = today();
                let reserved_for = data.reservation_date.unwrap_or(today);
                if reserved_for < today {
                    return Err(FieldErrors::single(
                        "reservation_date",
                        "Reservation date cannot be in the past",
                    )
                    .into());
                }
                self.reserve_for(book_id()?, data.user_id, reserved_for, &entry)
                    .await?
            }
            TransactionKind::Fine => {
                let mut tx = self.pool.begin().await?;
                let kind = TransactionKind::Fine;
                let fine = record(&mut tx, data.user_id, data.book_id, kind, &entry)
                    .await
                    .map_err(|err| match err {
                        AppError::Database(err) if is_foreign_key_violation(&err) => {
                            AppError::NotFound("user or book")
                        }
                        err => err,
                    })?;
                tx.commit().await?;
                fine
            }
        };

        info!(transaction_id = transaction.id, "transaction recorded");
        Ok(transaction)
    }

    /// Staff see the whole ledger, everyone else only their own entries. Newest first.
    pub async fn transaction_query(
        &self,
        viewer: &User,
        page: &PageQuery,
    ) -> Result<TransactionChunk, AppError> {
        let (offset, limit) = page_bounds(page.page_size, page.page);
        let owner = (!viewer.role.is_staff()).then_some(viewer.id);

        let items = sqlx::query_as(
            "SELECT * FROM transactions
            WHERE $1::bigint IS NULL OR user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3",
        )
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE $1::bigint IS NULL OR user_id = $1",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok(TransactionChunk {
            items,
            total_count: total_count as u32,
        })
    }

    pub async fn dashboard(&self) -> Result<Dashboard, AppError> {
        let (total_books, total_users, open_borrowings, overdue_borrowings): (i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT
                    (SELECT COUNT(*) FROM books),
                    (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM borrowings WHERE NOT returned),
                    (SELECT COUNT(*) FROM borrowings WHERE NOT returned AND due_date < $1)",
            )
            .bind(today())
            .fetch_one(&self.pool)
            .await?;

        let recent_transactions = sqlx::query_as(
            "SELECT * FROM transactions ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(RECENT_TRANSACTIONS)
        .fetch_all(&self.pool)
        .await?;

        Ok(Dashboard {
            total_books,
            total_users,
            open_borrowings,
            overdue_borrowings,
            recent_transactions,
        })
    }

    /// Activity between `from` and `to`, both days included.
    pub async fn report(&self, query: &ReportQuery) -> Result<Report, AppError> {
        let counts: Vec<KindCount> = sqlx::query_as(
            "SELECT kind, COUNT(*) AS count FROM transactions
            WHERE (created_at AT TIME ZONE 'UTC')::date BETWEEN $1 AND $2
            GROUP BY kind
            ORDER BY kind",
        )
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await?;

        let fine_total: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions
            WHERE kind = 'FINE' AND (created_at AT TIME ZONE 'UTC')::date BETWEEN $1 AND $2",
        )
        .bind(query.from)
        .bind(query.to)
        .fetch_one(&self.pool)
        .await?;

        let top_books: Vec<BookCount> = sqlx::query_as(
            "SELECT b.id AS book_id, b.title, COUNT(*) AS borrow_count
            FROM borrowings br
            JOIN books b ON b.id = br.book_id
            WHERE br.borrow_date BETWEEN $1 AND $2
            GROUP BY b.id, b.title
            ORDER BY borrow_count DESC, b.title
            LIMIT $3",
        )
        .bind(query.from)
        .bind(query.to)
        .bind(TOP_BOOKS)
        .fetch_all(&self.pool)
        .await?;

        let overdue: Vec<BorrowingView> = sqlx::query_as(&format!(
            "{BORROWING_VIEW_SELECT} WHERE NOT br.returned AND br.due_date < $1 ORDER BY br.due_date"
        ))
        .bind(today())
        .fetch_all(&self.pool)
        .await?;

        Ok(Report {
            from: query.from,
            to: query.to,
            counts,
            fine_total,
            top_books,
            overdue,
        })
    }

    #[cfg(test)]
    pub(super) async fn transaction_kinds(
        &self,
        user_id: i64,
    ) -> Result<Vec<TransactionKind>, AppError> {
        let kinds =
            sqlx::query_scalar("SELECT kind FROM transactions WHERE user_id = $1 ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(kinds)
    }
}
