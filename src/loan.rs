//! Lending rules
//!
//! Pure checks applied by the circulation queries while the book row is locked. Nothing here
//! touches the database, so every rule can be exercised without a connection.
use crate::models::Borrowing;
use chrono::{Duration, NaiveDate, Utc};
use thiserror::Error;

pub const LOAN_PERIOD_DAYS: i64 = 14;
pub const MAX_EXTENSION_DAYS: i64 = 14;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CirculationError {
    #[error("no copies of this book are currently available")]
    NoCopiesAvailable,

    #[error("every copy of this book is already on the shelf")]
    AllCopiesOnShelf,

    #[error("you have already borrowed this book")]
    AlreadyBorrowed,

    #[error("this book has already been returned")]
    AlreadyReturned,

    #[error("an overdue borrowing cannot be extended")]
    Overdue,

    #[error("this borrowing has already been extended")]
    AlreadyExtended,

    #[error("you already have a reservation for this book")]
    AlreadyReserved,

    #[error("available copies ({available}) must be between 0 and total copies ({total})")]
    InvalidCopies { total: i32, available: i32 },

    #[error("{on_loan} copies are on loan, so at most {shelf} of {total} can be available")]
    CopiesOnLoan { total: i32, on_loan: i32, shelf: i32 },
}

/// Inventory counters of one book. Construction enforces `0 <= available <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copies {
    total: i32,
    available: i32,
}

impl Copies {
    pub fn new(total: i32, available: i32) -> Result<Self, CirculationError> {
        if available < 0 || available > total {
            return Err(CirculationError::InvalidCopies { total, available });
        }
        Ok(Self { total, available })
    }

    pub fn total(self) -> i32 {
        self.total
    }

    pub fn available(self) -> i32 {
        self.available
    }

    pub fn on_loan(self) -> i32 {
        self.total - self.available
    }

    /// One copy leaves the shelf.
    pub fn checkout(self) -> Result<Self, CirculationError> {
        if self.available == 0 {
            return Err(CirculationError::NoCopiesAvailable);
        }
        Ok(Self {
            available: self.available - 1,
            ..self
        })
    }

    /// One copy comes back. Refuses to go above the total.
    pub fn checkin(self) -> Result<Self, CirculationError> {
        if self.available >= self.total {
            return Err(CirculationError::AllCopiesOnShelf);
        }
        Ok(Self {
            available: self.available + 1,
            ..self
        })
    }

    /// Counters after a catalog edit while `on_loan` copies are out. Every open loan must still
    /// fit back on the shelf, so `available` is capped at `total - on_loan`; without an explicit
    /// value all remaining copies are shelved.
    pub fn resize(
        total: i32,
        available: Option<i32>,
        on_loan: i32,
    ) -> Result<Self, CirculationError> {
        let shelf = total - on_loan;
        if shelf < 0 {
            return Err(CirculationError::CopiesOnLoan {
                total,
                on_loan,
                shelf: 0,
            });
        }
        let available = available.unwrap_or(shelf);
        if available > shelf {
            return Err(CirculationError::CopiesOnLoan {
                total,
                on_loan,
                shelf,
            });
        }
        Self::new(total, available)
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn due_date(borrowed_on: NaiveDate) -> NaiveDate {
    borrowed_on + Duration::days(LOAN_PERIOD_DAYS)
}

pub fn is_overdue(borrowing: &Borrowing, today: NaiveDate) -> bool {
    !borrowing.returned && borrowing.due_date < today
}

/// Checks that `borrowing` may be pushed back by `days` and returns the new due date.
pub fn extended_due_date(
    borrowing: &Borrowing,
    today: NaiveDate,
    days: i64,
) -> Result<NaiveDate, CirculationError> {
    if borrowing.returned {
        return Err(CirculationError::AlreadyReturned);
    }
    if is_overdue(borrowing, today) {
        return Err(CirculationError::Overdue);
    }
    if borrowing.extended {
        return Err(CirculationError::AlreadyExtended);
    }
    Ok(borrowing.due_date + Duration::days(days))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn borrowing(due_date: NaiveDate) -> Borrowing {
        Borrowing {
            id: 1,
            book_id: 1,
            user_id: 1,
            borrow_date: due_date - Duration::days(LOAN_PERIOD_DAYS),
            due_date,
            return_date: None,
            returned: false,
            extended: false,
        }
    }

    #[test]
    fn rejects_counts_outside_bounds() {
        assert_eq!(
            Copies::new(5, 6),
            Err(CirculationError::InvalidCopies {
                total: 5,
                available: 6
            })
        );
        assert!(Copies::new(5, -1).is_err());
        assert!(Copies::new(0, 0).is_ok());
    }

    #[test]
    fn checkout_decrements_until_empty() {
        let copies = Copies::new(2, 2).unwrap();
        let copies = copies.checkout().unwrap();
        assert_eq!(copies.available(), 1);
        let copies = copies.checkout().unwrap();
        assert_eq!(copies.available(), 0);
        assert_eq!(copies.checkout(), Err(CirculationError::NoCopiesAvailable));
    }

    #[test]
    fn checkin_never_exceeds_total() {
        let copies = Copies::new(5, 4).unwrap().checkin().unwrap();
        assert_eq!(copies.available(), 5);
        assert_eq!(copies.checkin(), Err(CirculationError::AllCopiesOnShelf));
    }

    #[test]
    fn borrow_then_return_restores_shelf() {
        let start = Copies::new(5, 5).unwrap();
        let out = start.checkout().unwrap();
        assert_eq!(out.available(), 4);
        assert_eq!(out.on_loan(), 1);
        assert_eq!(out.checkin().unwrap(), start);
    }

    #[test]
    fn resizing_keeps_loans_out() {
        let grown = Copies::resize(8, None, 1).unwrap();
        assert_eq!((grown.total(), grown.available()), (8, 7));
        assert_eq!(grown.on_loan(), 1);
        assert_eq!(
            Copies::resize(0, None, 1),
            Err(CirculationError::CopiesOnLoan {
                total: 0,
                on_loan: 1,
                shelf: 0
            })
        );
    }

    #[test]
    fn explicit_available_leaves_room_for_loans() {
        assert_eq!(
            Copies::resize(2, Some(2), 1),
            Err(CirculationError::CopiesOnLoan {
                total: 2,
                on_loan: 1,
                shelf: 1
            })
        );
        let copies = Copies::resize(2, Some(1), 1).unwrap();
        assert_eq!(copies.checkin().unwrap().available(), 2);
        // fewer on the shelf than possible, e.g. a damaged copy
        assert_eq!(Copies::resize(5, Some(2), 1).unwrap().available(), 2);
        assert!(Copies::resize(5, Some(-1), 0).is_err());
    }

    #[test]
    fn due_date_is_two_weeks_out() {
        assert_eq!(due_date(day(2024, 2, 20)), day(2024, 3, 5));
    }

    #[test]
    fn extension_moves_due_date_once() {
        let today = day(2024, 5, 1);
        let open = borrowing(day(2024, 5, 10));
        assert_eq!(extended_due_date(&open, today, 7), Ok(day(2024, 5, 17)));

        let extended = Borrowing {
            extended: true,
            ..open.clone()
        };
        assert_eq!(
            extended_due_date(&extended, today, 7),
            Err(CirculationError::AlreadyExtended)
        );
    }

    #[test]
    fn overdue_or_returned_cannot_be_extended() {
        let today = day(2024, 5, 20);
        let late = borrowing(day(2024, 5, 10));
        assert!(is_overdue(&late, today));
        assert_eq!(
            extended_due_date(&late, today, 3),
            Err(CirculationError::Overdue)
        );

        let returned = Borrowing {
            returned: true,
            return_date: Some(today),
            ..late
        };
        assert!(!is_overdue(&returned, today));
        assert_eq!(
            extended_due_date(&returned, today, 3),
            Err(CirculationError::AlreadyReturned)
        );
    }

    #[test]
    fn due_today_is_not_overdue() {
        let today = day(2024, 5, 10);
        assert!(!is_overdue(&borrowing(today), today));
    }
}
