//! JSON export and import of owner records.
//!
//! A backup file is named `<owner>_backup_<YYYYmmdd_HHMMSS>.json` and holds
//! the owner's cars, bookings, expenses and logins. Restore works on the
//! record store directly, so run it while the server is stopped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::EngineError;
use crate::model::{Booking, Car, Expense, User};
use crate::owner::sanitize_owner;
use crate::store::{self, RecordStore, StoreError};

const MARKER: &str = "_backup_";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cars: Vec<Car>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookings: Vec<Booking>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expenses: Vec<Expense>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<User>,
}

impl BackupFile {
    fn is_empty(&self) -> bool {
        self.cars.is_empty()
            && self.bookings.is_empty()
            && self.expenses.is_empty()
            && self.users.is_empty()
    }
}

/// What a restore wrote, per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub owner: String,
    pub cars: usize,
    pub bookings: usize,
    pub expenses: usize,
    pub users: usize,
}

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Back up one owner, or every owner in the store. Owners without any
/// records are skipped.
pub fn backup(
    store: &dyn RecordStore,
    dir: &Path,
    owner: Option<&str>,
    stamp: &str,
) -> Result<Vec<PathBuf>, BackupError> {
    fs::create_dir_all(dir)?;
    let owners = match owner {
        Some(name) => vec![sanitize_owner(name)?],
        None => store.owners()?,
    };

    let mut written = Vec::new();
    for owner in owners {
        let file = BackupFile {
            cars: store::load(store, &owner)?,
            bookings: store::load(store, &owner)?,
            expenses: store::load(store, &owner)?,
            users: store::load(store, &owner)?,
        };
        if file.is_empty() {
            continue;
        }
        let path = dir.join(format!("{owner}{MARKER}{stamp}.json"));
        fs::write(&path, serde_json::to_vec_pretty(&file)?)?;
        info!(owner, path = %path.display(), "backed up owner records");
        written.push(path);
    }
    Ok(written)
}

/// Owner a backup file belongs to, taken from the name before `_backup_`.
pub fn owner_from_path(path: &Path) -> Result<String, BackupError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match name.split_once(MARKER) {
        Some((owner, _)) if !owner.is_empty() => Ok(sanitize_owner(owner)?),
        _ => Err(BackupError::BadFileName(path.to_path_buf())),
    }
}

/// Restore a backup file. Only tables present and non-empty in the file are
/// overwritten; the others are left as they are.
pub fn restore(store: &dyn RecordStore, path: &Path) -> Result<Restored, BackupError> {
    let owner = owner_from_path(path)?;
    let mut file: BackupFile = serde_json::from_slice(&fs::read(path)?)?;

    for car in &mut file.cars {
        car.owner.clone_from(&owner);
    }
    for booking in &mut file.bookings {
        booking.owner.clone_from(&owner);
    }
    for expense in &mut file.expenses {
        expense.owner.clone_from(&owner);
    }
    for user in &mut file.users {
        user.owner.clone_from(&owner);
    }

    if !file.cars.is_empty() {
        store::save(store, &owner, &file.cars)?;
    }
    if !file.bookings.is_empty() {
        store::save(store, &owner, &file.bookings)?;
    }
    if !file.expenses.is_empty() {
        store::save(store, &owner, &file.expenses)?;
    }
    if !file.users.is_empty() {
        store::save(store, &owner, &file.users)?;
    }

    let restored = Restored {
        cars: file.cars.len(),
        bookings: file.bookings.len(),
        expenses: file.expenses.len(),
        users: file.users.len(),
        owner,
    };
    info!(
        owner = restored.owner,
        cars = restored.cars,
        bookings = restored.bookings,
        expenses = restored.expenses,
        users = restored.users,
        "restored backup"
    );
    Ok(restored)
}

/// Backup files in `dir`, sorted by name. A missing directory has none.
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(MARKER) && n.ends_with(".json"));
        if is_backup {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug)]
pub enum BackupError {
    Io(io::Error),
    Json(serde_json::Error),
    Store(StoreError),
    Owner(EngineError),
    BadFileName(PathBuf),
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::Io(e) => write!(f, "I/O error: {e}"),
            BackupError::Json(e) => write!(f, "bad backup JSON: {e}"),
            BackupError::Store(e) => write!(f, "store error: {e}"),
            BackupError::Owner(e) => write!(f, "{e}"),
            BackupError::BadFileName(p) => {
                write!(f, "not a backup file name (want <owner>_backup_<stamp>.json): {}", p.display())
            }
        }
    }
}

impl std::error::Error for BackupError {}

impl From<io::Error> for BackupError {
    fn from(e: io::Error) -> Self {
        BackupError::Io(e)
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::Json(e)
    }
}

impl From<StoreError> for BackupError {
    fn from(e: StoreError) -> Self {
        BackupError::Store(e)
    }
}

impl From<EngineError> for BackupError {
    fn from(e: EngineError) -> Self {
        BackupError::Owner(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::MemoryStore;
    use ulid::Ulid;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentdesk_test_backup").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn car(owner: &str) -> Car {
        Car {
            id: Ulid::new(),
            owner: owner.into(),
            name: "Premio".into(),
            plate_number: "UBA 123X".into(),
            model: "Toyota".into(),
            status: CarStatus::Available,
            last_service_date: Some("2024-05-01".parse().unwrap()),
            next_service_date: None,
        }
    }

    fn expense(owner: &str, car_id: Ulid) -> Expense {
        Expense {
            id: Ulid::new(),
            owner: owner.into(),
            car_id,
            date: "2024-05-02".parse().unwrap(),
            description: "Fuel".into(),
            amount: 50,
            kind: ExpenseKind::Fuel,
        }
    }

    #[test]
    fn backup_writes_one_file_per_owner_with_records() {
        let dir = test_dir("per_owner");
        let store = MemoryStore::new();
        store::save(&store, "acme", &[car("acme")]).unwrap();
        store::save::<Car>(&store, "empty", &[]).unwrap();

        let written = backup(&store, &dir, None, "20240601_120000").unwrap();
        assert_eq!(written, vec![dir.join("acme_backup_20240601_120000.json")]);

        let json = fs::read_to_string(&written[0]).unwrap();
        assert!(json.contains("\"cars\""));
        assert!(!json.contains("\"bookings\""));
    }

    #[test]
    fn restore_takes_owner_from_file_name() {
        let dir = test_dir("restore_owner");
        let source = MemoryStore::new();
        let c = car("acme");
        store::save(&source, "acme", std::slice::from_ref(&c)).unwrap();
        store::save(&source, "acme", &[expense("acme", c.id)]).unwrap();
        let written = backup(&source, &dir, Some("acme"), "20240601_120000").unwrap();

        let renamed = dir.join("zeta_backup_20240601_120000.json");
        fs::rename(&written[0], &renamed).unwrap();

        let target = MemoryStore::new();
        let restored = restore(&target, &renamed).unwrap();
        assert_eq!(
            restored,
            Restored {
                owner: "zeta".into(),
                cars: 1,
                bookings: 0,
                expenses: 1,
                users: 0
            }
        );
        let cars: Vec<Car> = store::load(&target, "zeta").unwrap();
        assert_eq!(cars[0].id, c.id);
        assert_eq!(cars[0].owner, "zeta");
    }

    #[test]
    fn restore_keeps_tables_missing_from_file() {
        let dir = test_dir("keep_missing");
        let store = MemoryStore::new();
        let existing = car("acme");
        store::save(&store, "acme", &[expense("acme", existing.id)]).unwrap();
        store::save(&store, "acme", std::slice::from_ref(&existing)).unwrap();

        let path = dir.join("acme_backup_20240101_000000.json");
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, r#"{"cars": [], "expenses": []}"#).unwrap();

        let restored = restore(&store, &path).unwrap();
        assert_eq!(restored.cars, 0);
        let cars: Vec<Car> = store::load(&store, "acme").unwrap();
        assert_eq!(cars, vec![existing]);
        let expenses: Vec<Expense> = store::load(&store, "acme").unwrap();
        assert_eq!(expenses.len(), 1);
    }

    #[test]
    fn logins_survive_backup_and_restore() {
        let dir = test_dir("logins");
        let source = MemoryStore::new();
        let login = User {
            username: "alice".into(),
            password: "pw".into(),
            owner: "acme".into(),
        };
        store::save(&source, "acme", std::slice::from_ref(&login)).unwrap();
        let written = backup(&source, &dir, None, "20240601_120000").unwrap();
        assert_eq!(written.len(), 1);
        assert!(fs::read_to_string(&written[0]).unwrap().contains("\"users\""));

        let target = MemoryStore::new();
        let restored = restore(&target, &written[0]).unwrap();
        assert_eq!(restored.users, 1);
        let users: Vec<User> = store::load(&target, "acme").unwrap();
        assert_eq!(users, vec![login]);
    }

    #[test]
    fn restore_rejects_foreign_file_name() {
        let store = MemoryStore::new();
        let err = restore(&store, Path::new("/tmp/cars.json")).unwrap_err();
        assert!(matches!(err, BackupError::BadFileName(_)));
    }

    #[test]
    fn list_backups_filters_and_sorts() {
        let dir = test_dir("list");
        assert!(list_backups(&dir).unwrap().is_empty());

        fs::create_dir_all(&dir).unwrap();
        for name in [
            "zeta_backup_20240102_000000.json",
            "acme_backup_20240101_000000.json",
            "notes.txt",
            "acme_backup_20240101_000000.csv",
        ] {
            fs::write(dir.join(name), "{}").unwrap();
        }
        let names: Vec<String> = list_backups(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "acme_backup_20240101_000000.json",
                "zeta_backup_20240102_000000.json"
            ]
        );
    }
}
