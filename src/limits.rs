//! Hard limits applied at the engine boundary.

pub const MAX_OWNERS: usize = 10_000;
pub const MAX_OWNER_NAME_LEN: usize = 64;

pub const MAX_CARS_PER_OWNER: usize = 10_000;
pub const MAX_BOOKINGS_PER_OWNER: usize = 500_000;
pub const MAX_EXPENSES_PER_OWNER: usize = 500_000;
pub const MAX_USERS_PER_OWNER: usize = 100;

/// Longest accepted free-text field (names, contacts, descriptions).
pub const MAX_TEXT_LEN: usize = 256;

/// Largest encoded record in a table file. Longer length headers are
/// treated as corruption.
pub const MAX_ROW_BYTES: usize = 64 * 1024;

/// Longest single rental.
pub const MAX_BOOKING_DAYS: i64 = 730;

/// Login reserved for the shared public booking link.
pub const PUBLIC_USER: &str = "public";
