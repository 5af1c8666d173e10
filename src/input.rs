//! Request payloads and their field validation.
use crate::{
    loan::MAX_EXTENSION_DAYS,
    models::{PaymentMethod, TransactionKind},
    role::Role,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Per-field messages, reported back to the client inline.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    fn required(&mut self, field: &'static str, value: &str, message: &str) {
        if value.trim().is_empty() {
            self.add(field, message);
        }
    }

    pub fn finish(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

// addresses are stored and looked up lowercased
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn normalize_website(website: &str) -> String {
    let website = website.trim();
    if website.is_empty() || website.starts_with("http://") || website.starts_with("https://") {
        website.to_string()
    } else {
        format!("https://{website}")
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterData {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    pub bio: Option<String>,
}

impl RegisterData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if !looks_like_email(&self.email) {
            errors.add("email", "Enter a valid email address");
        }
        errors.required("first_name", &self.first_name, "First name is required");
        errors.required("last_name", &self.last_name, "Last name is required");
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        if self.password != self.password_confirm {
            errors.add("password_confirm", "Passwords do not match");
        }
        if !self.role.is_self_assignable() {
            errors.add("role", "This account type cannot be self-registered");
        }
        if self.role == Role::Author && self.bio.as_deref().map_or(true, |bio| bio.trim().is_empty())
        {
            errors.add("bio", "Bio is required for authors");
        }
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileData {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl ProfileData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if !looks_like_email(&self.email) {
            errors.add("email", "Enter a valid email address");
        }
        errors.required("first_name", &self.first_name, "First name is required");
        errors.required("last_name", &self.last_name, "Last name is required");
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewData {
    pub rating: Option<i64>,
    pub comment: Option<String>,
}

impl ReviewData {
    /// Returns the rating narrowed to the stored column type.
    pub fn validate(&self) -> Result<(i16, &str), FieldErrors> {
        let mut errors = FieldErrors::default();
        let rating = match self.rating {
            None => {
                errors.add("rating", "Rating is required");
                0
            }
            Some(rating @ 1..=5) => rating as i16,
            Some(_) => {
                errors.add("rating", "Rating must be between 1 and 5");
                0
            }
        };
        let comment = self.comment.as_deref().unwrap_or_default().trim();
        if comment.is_empty() {
            errors.add("comment", "Comment is required");
        }
        errors.finish()?;
        Ok((rating, comment))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    pub title: String,
    pub isbn: String,
    pub publication_date: Option<NaiveDate>,
    pub pages: Option<i32>,
    pub total_copies: i32,
    pub available_copies: Option<i32>,
    #[serde(default)]
    pub description: String,
    pub cover_image: Option<String>,
    pub publisher_id: Option<i64>,
    #[serde(default)]
    pub author_ids: Vec<i64>,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
}

impl BookData {
    pub fn available_copies(&self) -> i32 {
        self.available_copies.unwrap_or(self.total_copies)
    }

    pub fn validate(&self, today: NaiveDate) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.required("title", &self.title, "Title is required");
        errors.required("isbn", &self.isbn, "ISBN is required");
        match self.publication_date {
            None => errors.add("publication_date", "Publication date is required"),
            Some(date) if date > today => {
                errors.add("publication_date", "Publication date cannot be in the future")
            }
            Some(_) => {}
        }
        match self.pages {
            None => errors.add("pages", "Number of pages is required"),
            Some(pages) if pages < 1 => errors.add("pages", "Number of pages must be positive"),
            Some(_) => {}
        }
        if self.publisher_id.is_none() {
            errors.add("publisher_id", "Publisher is required");
        }
        if self.author_ids.is_empty() {
            errors.add("author_ids", "At least one author is required");
        }
        if self.genre_ids.is_empty() {
            errors.add("genre_ids", "At least one genre is required");
        }
        if self.total_copies < 0 {
            errors.add("total_copies", "Total copies cannot be negative");
        }
        let available = self.available_copies();
        if available < 0 {
            errors.add("available_copies", "Available copies cannot be negative");
        } else if available > self.total_copies {
            errors.add(
                "available_copies",
                "Available copies cannot be greater than total copies",
            );
        }
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtendData {
    pub extension_days: i64,
}

impl ExtendData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        if (1..=MAX_EXTENSION_DAYS).contains(&self.extension_days) {
            Ok(())
        } else {
            Err(FieldErrors::single(
                "extension_days",
                format!("Extension must be between 1 and {MAX_EXTENSION_DAYS} days"),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReserveData {
    pub reservation_date: Option<NaiveDate>,
}

impl ReserveData {
    pub fn validate(&self, today: NaiveDate) -> Result<NaiveDate, FieldErrors> {
        match self.reservation_date {
            None => Err(FieldErrors::single(
                "reservation_date",
                "Reservation date is required",
            )),
            Some(date) if date < today => Err(FieldErrors::single(
                "reservation_date",
                "Reservation date cannot be in the past",
            )),
            Some(date) => Ok(date),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
    pub user_id: i64,
    pub book_id: Option<i64>,
    pub kind: TransactionKind,
    #[serde(default)]
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub note: String,
    // only read for RESERVATION
    pub reservation_date: Option<NaiveDate>,
}

impl TransactionData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        if self.kind != TransactionKind::Fine && self.book_id.is_none() {
            errors.add("book_id", "Book is required");
        }
        if self.amount < Decimal::ZERO {
            errors.add("amount", "Amount cannot be negative");
        }
        if self.kind == TransactionKind::Fine {
            if self.amount <= Decimal::ZERO {
                errors.add("amount", "Amount is required for fine transactions");
            }
            if self.payment_method.is_none() {
                errors.add(
                    "payment_method",
                    "Payment method is required for fine transactions",
                );
            }
        }
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct GenreData {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl GenreData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.required("name", &self.name, "Name is required");
        if self.description.chars().count() > 500 {
            errors.add("description", "Description is limited to 500 characters");
        }
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationData {
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct PublisherData {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub website: String,
    pub location: Option<LocationData>,
}

impl PublisherData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.required("name", &self.name, "Name is required");
        if self.email.trim().is_empty() {
            errors.add("email", "Email is required");
        } else if !looks_like_email(&self.email) {
            errors.add("email", "Enter a valid email address");
        }
        if self.location.is_none() {
            errors.add("location", "Location is required");
        }
        errors.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct StaffData {
    pub user_id: i64,
    pub phone: String,
    pub position: String,
}

impl StaffData {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        errors.required("phone", &self.phone, "Phone is required");
        errors.required("position", &self.position, "Position is required");
        errors.finish()
    }
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Default, Deserialize)]
pub struct BookSearch {
    pub q: Option<String>,
    pub title: Option<String>,
    pub isbn: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub page: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl ReportQuery {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        if self.from > self.to {
            return Err(FieldErrors::single(
                "from",
                "Start date must not be after end date",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn register() -> RegisterData {
        RegisterData {
            email: "reader@example.com".into(),
            password: "correct horse".into(),
            password_confirm: "correct horse".into(),
            first_name: "Ada".into(),
            last_name: "Reader".into(),
            role: Role::User,
            bio: None,
        }
    }

    fn book() -> BookData {
        BookData {
            title: "Dune".into(),
            isbn: "9780441013593".into(),
            publication_date: NaiveDate::from_ymd_opt(1965, 8, 1),
            pages: Some(412),
            total_copies: 5,
            available_copies: None,
            description: String::new(),
            cover_image: None,
            publisher_id: Some(1),
            author_ids: vec![1],
            genre_ids: vec![2],
        }
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a b@c.de"));
        assert!(!looks_like_email("a@@c.de"));
    }

    #[test]
    fn email_is_case_folded() {
        assert_eq!(normalize_email("  Ada.Reader@Example.COM "), "ada.reader@example.com");
    }

    #[test]
    fn website_gets_scheme() {
        assert_eq!(normalize_website("www.test.com"), "https://www.test.com");
        assert_eq!(normalize_website("http://x.org"), "http://x.org");
        assert_eq!(normalize_website(""), "");
    }

    #[test]
    fn registration_accepts_reader() {
        assert_eq!(register().validate(), Ok(()));
    }

    #[test]
    fn registration_reports_every_problem() {
        let data = RegisterData {
            email: "nope".into(),
            password: "short".into(),
            password_confirm: "other".into(),
            role: Role::Admin,
            ..register()
        };
        let errors = data.validate().unwrap_err();
        assert!(errors.get("email").is_some());
        assert!(errors.get("password").is_some());
        assert!(errors.get("password_confirm").is_some());
        assert!(errors.get("role").is_some());
    }

    #[test]
    fn author_registration_needs_bio() {
        let data = RegisterData {
            role: Role::Author,
            bio: Some("  ".into()),
            ..register()
        };
        assert_eq!(
            data.validate().unwrap_err().get("bio"),
            Some(&["Bio is required for authors".to_string()][..])
        );
    }

    #[test]
    fn review_rating_bounds() {
        for rating in [0, 6, -1, 100] {
            let data = ReviewData {
                rating: Some(rating),
                comment: Some("fine".into()),
            };
            assert!(data.validate().is_err(), "rating {rating} accepted");
        }
        let data = ReviewData {
            rating: Some(5),
            comment: Some(" Great book! ".into()),
        };
        assert_eq!(data.validate(), Ok((5, "Great book!")));
    }

    #[test]
    fn review_requires_rating_and_comment() {
        let errors = ReviewData {
            rating: None,
            comment: None,
        }
        .validate()
        .unwrap_err();
        assert_eq!(errors.get("rating"), Some(&["Rating is required".to_string()][..]));
        assert_eq!(errors.get("comment"), Some(&["Comment is required".to_string()][..]));
    }

    #[test]
    fn book_defaults_available_to_total() {
        let data = book();
        assert_eq!(data.available_copies(), 5);
        assert_eq!(data.validate(today()), Ok(()));
    }

    #[test]
    fn book_copies_invariant() {
        let data = BookData {
            available_copies: Some(6),
            ..book()
        };
        assert!(data.validate(today()).unwrap_err().get("available_copies").is_some());

        let data = BookData {
            available_copies: Some(-1),
            ..book()
        };
        assert!(data.validate(today()).unwrap_err().get("available_copies").is_some());
    }

    #[test]
    fn book_rejects_future_publication_and_missing_links() {
        let data = BookData {
            publication_date: NaiveDate::from_ymd_opt(2030, 1, 1),
            author_ids: vec![],
            genre_ids: vec![],
            publisher_id: None,
            ..book()
        };
        let errors = data.validate(today()).unwrap_err();
        for field in ["publication_date", "author_ids", "genre_ids", "publisher_id"] {
            assert!(errors.get(field).is_some(), "{field} not reported");
        }
    }

    #[test]
    fn extension_days_range() {
        assert!(ExtendData { extension_days: 0 }.validate().is_err());
        assert!(ExtendData { extension_days: 15 }.validate().is_err());
        assert!(ExtendData { extension_days: 14 }.validate().is_ok());
    }

    #[test]
    fn reservation_not_in_past() {
        let yesterday = today().pred_opt().unwrap();
        assert!(ReserveData {
            reservation_date: Some(yesterday)
        }
        .validate(today())
        .is_err());
        assert_eq!(
            ReserveData {
                reservation_date: Some(today())
            }
            .validate(today()),
            Ok(today())
        );
        assert!(ReserveData {
            reservation_date: None
        }
        .validate(today())
        .is_err());
    }

    #[test]
    fn fine_needs_amount_and_payment() {
        let data: TransactionData =
            serde_json::from_str(r#"{"user_id": 1, "kind": "FINE"}"#).unwrap();
        let errors = data.validate().unwrap_err();
        assert!(errors.get("amount").is_some());
        assert!(errors.get("payment_method").is_some());

        let data: TransactionData = serde_json::from_str(
            r#"{"user_id": 1, "kind": "FINE", "amount": "2.50", "payment_method": "CASH"}"#,
        )
        .unwrap();
        assert_eq!(data.validate(), Ok(()));
        assert_eq!(data.amount, Decimal::new(250, 2));
    }

    #[test]
    fn borrow_transaction_needs_book() {
        let data: TransactionData =
            serde_json::from_str(r#"{"user_id": 1, "kind": "BORROW"}"#).unwrap();
        assert!(data.validate().unwrap_err().get("book_id").is_some());
    }

    #[test]
    fn publisher_requires_location_and_email() {
        let data: PublisherData =
            serde_json::from_str(r#"{"name": "Ace", "email": "bad"}"#).unwrap();
        let errors = data.validate().unwrap_err();
        assert!(errors.get("email").is_some());
        assert!(errors.get("location").is_some());
    }

    #[test]
    fn search_defaults() {
        let search: BookSearch = serde_json::from_str("{}").unwrap();
        assert_eq!((search.page_size, search.page), (20, 0));
    }

    #[test]
    fn report_range_order() {
        let query = ReportQuery {
            from: today(),
            to: today().pred_opt().unwrap(),
        };
        assert!(query.validate().is_err());
    }
}
