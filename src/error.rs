use crate::{input::FieldErrors, loan::CirculationError};
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid input")]
    Validation(FieldErrors),

    #[error(transparent)]
    Circulation(#[from] CirculationError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("you have already reviewed this book")]
    DuplicateReview,

    #[error("a book with this ISBN already exists")]
    DuplicateIsbn,

    #[error("an account with this email already exists")]
    DuplicateEmail,

    #[error("a {0} with this name already exists")]
    DuplicateName(&'static str),

    #[error("authentication required")]
    Unauthorized,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("you do not have permission to {0}")]
    Forbidden(&'static str),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FieldErrors> for AppError {
    fn from(errors: FieldErrors) -> Self {
        AppError::Validation(errors)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Circulation(_)
            | AppError::DuplicateReview
            | AppError::DuplicateIsbn
            | AppError::DuplicateEmail
            | AppError::DuplicateName(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            AppError::Validation(errors) => {
                HttpResponse::build(status).json(json!({ "errors": errors }))
            }
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!("request failed: {self}");
                HttpResponse::build(status).json(json!({ "error": "internal server error" }))
            }
            _ => HttpResponse::build(status).json(json!({ "error": self.to_string() })),
        }
    }
}

fn has_sqlstate(error: &sqlx::Error, code: &str) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(code))
}

pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    has_sqlstate(error, "23505")
}

pub fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    has_sqlstate(error, "23503")
}

#[cfg(test)]
mod test {
    use super::AppError;
    use crate::{input::FieldErrors, loan::CirculationError};
    use actix_web::{body::to_bytes, http::StatusCode, ResponseError};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    async fn body_json(error: AppError) -> (StatusCode, Value) {
        let response = error.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn validation_lists_fields() {
        let errors = FieldErrors::single("rating", "Rating must be between 1 and 5");
        let (status, body) = body_json(errors.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "errors": { "rating": ["Rating must be between 1 and 5"] } })
        );
    }

    #[actix_web::test]
    async fn business_rules_are_conflicts() {
        let (status, body) = body_json(CirculationError::NoCopiesAvailable.into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(
            body,
            json!({ "error": "no copies of this book are currently available" })
        );
        assert_eq!(AppError::DuplicateReview.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::DuplicateIsbn.status_code(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn internal_errors_are_not_leaked() {
        let (status, body) = body_json(AppError::Database(sqlx::Error::RowNotFound)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "internal server error" }));
    }

    #[test]
    fn auth_statuses() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Forbidden("view reports").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::NotFound("book").status_code(), StatusCode::NOT_FOUND);
    }
}
