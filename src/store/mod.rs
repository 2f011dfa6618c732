mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::io;

use serde::{Deserialize, Serialize};

use crate::model::*;

/// The persisted entity tables. Every table is scoped by owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Cars,
    Bookings,
    Expenses,
    Users,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Cars, Table::Bookings, Table::Expenses, Table::Users];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Cars => "cars",
            Table::Bookings => "bookings",
            Table::Expenses => "expenses",
            Table::Users => "users",
        }
    }
}

/// One stored record. This is the on-disk record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row {
    Car(Car),
    Booking(Booking),
    Expense(Expense),
    User(User),
}

impl Row {
    fn table(&self) -> Table {
        match self {
            Row::Car(_) => Table::Cars,
            Row::Booking(_) => Table::Bookings,
            Row::Expense(_) => Table::Expenses,
            Row::User(_) => Table::Users,
        }
    }
}

/// A record type that lives in exactly one table.
pub trait Record: Sized + Clone {
    const TABLE: Table;
    fn into_row(self) -> Row;
    fn from_row(row: Row) -> Option<Self>;
}

macro_rules! record {
    ($ty:ident, $table:ident) => {
        impl Record for $ty {
            const TABLE: Table = Table::$table;

            fn into_row(self) -> Row {
                Row::$ty(self)
            }

            fn from_row(row: Row) -> Option<Self> {
                match row {
                    Row::$ty(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

record!(Car, Cars);
record!(Booking, Bookings);
record!(Expense, Expenses);
record!(User, Users);

/// Owner-scoped tabular persistence: read or replace a whole table at once.
pub trait RecordStore: Send + Sync {
    fn read_all(&self, owner: &str, table: Table) -> Result<Vec<Row>, StoreError>;

    /// Replace the owner's table atomically.
    fn write_all(&self, owner: &str, table: Table, rows: Vec<Row>) -> Result<(), StoreError>;

    /// Owners that have at least one table stored, sorted.
    fn owners(&self) -> Result<Vec<String>, StoreError>;
}

pub fn load<R: Record>(store: &dyn RecordStore, owner: &str) -> Result<Vec<R>, StoreError> {
    store
        .read_all(owner, R::TABLE)?
        .into_iter()
        .map(|row| {
            let found = row.table();
            R::from_row(row).ok_or(StoreError::WrongTable {
                table: R::TABLE,
                found,
            })
        })
        .collect()
}

pub fn save<R: Record>(store: &dyn RecordStore, owner: &str, records: &[R]) -> Result<(), StoreError> {
    let rows = records.iter().cloned().map(Record::into_row).collect();
    store.write_all(owner, R::TABLE, rows)
}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    WrongTable { table: Table, found: Table },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::WrongTable { table, found } => {
                write!(f, "{} table holds a {} row", table.name(), found.name())
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            username: name.into(),
            password: "secret".into(),
            owner: "acme".into(),
        }
    }

    #[test]
    fn typed_save_and_load() {
        let store = MemoryStore::new();
        let users = vec![user("alice"), user("bob")];
        save(&store, "acme", &users).unwrap();
        let loaded: Vec<User> = load(&store, "acme").unwrap();
        assert_eq!(loaded, users);
    }

    #[test]
    fn load_rejects_foreign_rows() {
        let store = MemoryStore::new();
        store
            .write_all("acme", Table::Cars, vec![Row::User(user("alice"))])
            .unwrap();
        let err = load::<Car>(&store, "acme").unwrap_err();
        assert!(matches!(
            err,
            StoreError::WrongTable { table: Table::Cars, found: Table::Users }
        ));
    }

    #[test]
    fn load_missing_table_is_empty() {
        let store = MemoryStore::new();
        let cars: Vec<Car> = load(&store, "nobody").unwrap();
        assert!(cars.is_empty());
    }
}
