use crate::role::Role;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub isbn: String,
    pub publication_date: NaiveDate,
    pub pages: i32,
    pub total_copies: i32,
    pub available_copies: i32,
    pub description: String,
    pub cover_image: Option<String>,
    pub publisher_id: Option<i64>,
}

// listing row with aggregated joins
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookSummary {
    pub id: i64,
    pub title: String,
    pub isbn: String,
    pub publication_date: NaiveDate,
    pub total_copies: i32,
    pub available_copies: i32,
    pub cover_image: Option<String>,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct BookChunk {
    pub items: Vec<BookSummary>,
    pub total_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub book: Book,
    pub publisher: Option<String>,
    pub authors: Vec<Author>,
    pub genres: Vec<Genre>,
    pub reviews: Vec<ReviewView>,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Author {
    pub id: i64,
    pub user_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorDetail {
    #[serde(flatten)]
    pub author: Author,
    pub books: Vec<BookSummary>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Location {
    pub id: i64,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Publisher {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub website: String,
    pub location_id: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "staff_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum StaffStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Staff {
    pub id: i64,
    pub user_id: i64,
    pub phone: String,
    pub position: String,
    pub status: StaffStatus,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Borrowing {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub borrow_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub returned: bool,
    pub extended: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BorrowingView {
    pub id: i64,
    pub book_id: i64,
    pub book_title: String,
    pub user_id: i64,
    pub borrow_date: NaiveDate,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub returned: bool,
    pub extended: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub reserved_for: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub fulfilled: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Review {
    pub id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReviewView {
    pub id: i64,
    pub reviewer: String,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Borrow,
    Return,
    Fine,
    Reservation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub book_id: Option<i64>,
    pub staff_id: Option<i64>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TransactionChunk {
    pub items: Vec<Transaction>,
    pub total_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user: User,
    pub borrowed: Vec<BorrowingView>,
    pub past_borrows: Vec<BorrowingView>,
    pub reservations: Vec<Reservation>,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_books: i64,
    pub total_users: i64,
    pub open_borrowings: i64,
    pub overdue_borrowings: i64,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct KindCount {
    pub kind: TransactionKind,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BookCount {
    pub book_id: i64,
    pub title: String,
    pub borrow_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub counts: Vec<KindCount>,
    pub fine_total: Decimal,
    pub top_books: Vec<BookCount>,
    pub overdue: Vec<BorrowingView>,
}
