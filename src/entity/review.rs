use super::Entity;
use crate::{
    error::{is_unique_violation, AppError},
    models::Review,
};
use tracing::info;

impl Entity {
    /// One review per reader and book. A second attempt is a conflict, never an overwrite.
    pub async fn review_create(
        &self,
        book_id: i64,
        user_id: i64,
        rating: i16,
        comment: &str,
    ) -> Result<Review, AppError> {
        let book_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM books WHERE id = $1)")
                .bind(book_id)
                .fetch_one(&self.pool)
                .await?;
        if !book_exists {
            return Err(AppError::NotFound("book"));
        }

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reviews WHERE book_id = $1 AND user_id = $2)",
        )
        .bind(book_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if already {
            return Err(AppError::DuplicateReview);
        }

        // the unique constraint still decides when two submissions race
        let review: Review = sqlx::query_as(
            "INSERT INTO reviews (book_id, user_id, rating, comment)
            VALUES ($1, $2, $3, $4)
            RETURNING *",
        )
        .bind(book_id)
        .bind(user_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::DuplicateReview
            } else {
                AppError::Database(err)
            }
        })?;

        info!(review_id = review.id, book_id, rating, "review added");
        Ok(review)
    }
}
