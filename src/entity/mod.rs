//! Database access
//!
//! `Entity` owns the Postgres pool and exposes one method per operation. Methods that touch a
//! book's copy counters lock the book row with `SELECT ... FOR UPDATE` inside a transaction, so
//! concurrent borrows and returns of the same book are serialized by the database.
mod account;
mod catalog;
mod circulation;
mod ledger;
mod review;

pub use circulation::Entry;

use sqlx::{postgres::PgPoolOptions, PgPool};

pub(crate) const BORROWING_VIEW_SELECT: &str = "
    SELECT
        br.id, br.book_id, b.title AS book_title, br.user_id, br.borrow_date,
        br.due_date, br.return_date, br.returned, br.extended
    FROM borrowings br
    JOIN books b ON b.id = br.book_id";

#[derive(Debug, Clone)]
pub struct Entity {
    pool: PgPool,
}

impl Entity {
    pub async fn new(db_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Entity { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// OFFSET/LIMIT pair for a zero-based page
fn page_bounds(page_size: u32, page: u32) -> (i64, i64) {
    let limit = i64::from(page_size.clamp(1, 100));
    (limit * i64::from(page), limit)
}
