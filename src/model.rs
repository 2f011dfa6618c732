use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar date without a time component. The only time type.
pub type Day = NaiveDate;

/// Half-open date range `[start, end)`: the checkout day is free for the next checkin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Result<Self, InvalidRange> {
        if end < start {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Exclusive end of the days the range occupies. A same-day range
    /// (`start == end`) still holds its one day.
    pub fn occupied_end(&self) -> Day {
        if self.end > self.start {
            self.end
        } else {
            self.start.succ_opt().unwrap_or(self.end)
        }
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.occupied_end() && self.occupied_end() > other.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.occupied_end() <= self.occupied_end()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRange {
    pub start: Day,
    pub end: Day,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "end date {} precedes start date {}", self.end, self.start)
    }
}

impl std::error::Error for InvalidRange {}

// ── Status enums ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! closed_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.trim().eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(UnknownVariant { kind: $kind, value: s.to_string() })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarStatus {
    #[default]
    Available,
    Booked,
    Maintenance,
}

closed_enum!(CarStatus, "car status", {
    Available => "Available",
    Booked => "Booked",
    Maintenance => "Maintenance",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

closed_enum!(BookingStatus, "booking status", {
    Pending => "Pending",
    Approved => "Approved",
    Rejected => "Rejected",
    Completed => "Completed",
});

impl BookingStatus {
    /// Pending and Approved bookings still hold their dates.
    pub fn holds_dates(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseKind {
    Fuel,
    Maintenance,
    #[default]
    Other,
}

closed_enum!(ExpenseKind, "expense kind", {
    Fuel => "Fuel",
    Maintenance => "Maintenance",
    Other => "Other",
});

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: Ulid,
    pub owner: String,
    pub name: String,
    pub plate_number: String,
    pub model: String,
    pub status: CarStatus,
    pub last_service_date: Option<Day>,
    pub next_service_date: Option<Day>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner: String,
    pub car_id: Ulid,
    pub customer_name: String,
    pub contact: String,
    pub start_date: Day,
    pub end_date: Day,
    pub purpose: Option<String>,
    /// Whole currency units.
    pub amount_paid: i64,
    pub status: BookingStatus,
    /// Set when the booking was accepted despite overlapping another one.
    pub rebooking: bool,
}

impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Ulid,
    pub owner: String,
    pub car_id: Ulid,
    pub date: Day,
    pub description: String,
    /// Whole currency units.
    pub amount: i64,
    pub kind: ExpenseKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
    pub owner: String,
}

// ── Mutation inputs ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCar {
    pub id: Ulid,
    pub name: String,
    pub plate_number: String,
    pub model: String,
    pub status: Option<CarStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub car_id: Ulid,
    pub customer_name: String,
    pub contact: String,
    pub start_date: Day,
    pub end_date: Day,
    pub purpose: Option<String>,
    pub amount_paid: i64,
    pub rebooking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpense {
    pub id: Ulid,
    pub car_id: Ulid,
    pub date: Option<Day>,
    pub description: String,
    pub amount: i64,
    pub kind: ExpenseKind,
}

/// Partial update of a car; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarChanges {
    pub name: Option<String>,
    pub plate_number: Option<String>,
    pub model: Option<String>,
    pub status: Option<CarStatus>,
    pub last_service_date: Option<Day>,
    pub next_service_date: Option<Day>,
}

/// Partial update of a booking; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChanges {
    pub status: Option<BookingStatus>,
    pub start_date: Option<Day>,
    pub end_date: Option<Day>,
    pub amount_paid: Option<i64>,
    pub rebooking: Option<bool>,
}

impl BookingChanges {
    pub fn touches_dates(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceEntry {
    pub car_id: Ulid,
    pub name: String,
    pub last_service_date: Option<Day>,
    pub next_service_date: Option<Day>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total_income: i64,
    pub total_expenses: i64,
    pub profit: i64,
}
