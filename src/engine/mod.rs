mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{
    Availability, available_cars_in, check_range, conflicts_in, is_available, list_available_cars,
};
pub use error::EngineError;
pub use queries::CarOffer;

use std::io;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::*;
use crate::store::{self, Record, RecordStore, StoreError};

/// One owner's records. The availability engine only ever sees a snapshot
/// of a single owner, so it never has to filter by owner itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub cars: Vec<Car>,
    pub bookings: Vec<Booking>,
    pub expenses: Vec<Expense>,
    pub users: Vec<User>,
}

impl Snapshot {
    pub fn load(store: &dyn RecordStore, owner: &str) -> Result<Self, StoreError> {
        Ok(Self {
            cars: store::load(store, owner)?,
            bookings: store::load(store, owner)?,
            expenses: store::load(store, owner)?,
            users: store::load(store, owner)?,
        })
    }

    pub fn car(&self, id: &ulid::Ulid) -> Option<&Car> {
        self.cars.iter().find(|c| c.id == *id)
    }

    pub fn booking(&self, id: &ulid::Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }
}

/// A booking after a mutation, with the live bookings it overlaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingOutcome {
    pub booking: Booking,
    pub conflicts: Vec<Booking>,
}

/// Per-owner service: keeps the owner's snapshot in memory and writes every
/// mutation through to the record store before applying it.
pub struct Engine {
    owner: String,
    store: Arc<dyn RecordStore>,
    pub(super) state: RwLock<Snapshot>,
}

impl Engine {
    pub fn new(owner: &str, store: Arc<dyn RecordStore>) -> Result<Self, EngineError> {
        let snapshot = Snapshot::load(store.as_ref(), owner)?;
        tracing::debug!(
            owner,
            cars = snapshot.cars.len(),
            bookings = snapshot.bookings.len(),
            "loaded owner records"
        );
        Ok(Self {
            owner: owner.to_string(),
            store,
            state: RwLock::new(snapshot),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Copy of the current records, for backups and reporting.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Write one table through to the store on a blocking thread.
    /// Caller holds the write lock and applies the change only on success.
    pub(super) async fn persist<R>(&self, records: &[R]) -> Result<(), EngineError>
    where
        R: Record + Send + 'static,
    {
        let store = self.store.clone();
        let owner = self.owner.clone();
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || store::save(store.as_ref(), &owner, &records))
            .await
            .map_err(|e| StoreError::Io(io::Error::other(e.to_string())))??;
        Ok(())
    }

    /// Write the bookings table, and the cars table when `cars` is set, then
    /// apply both to `state`. If the cars write fails the previous bookings
    /// table is written back and `state` is left as it was.
    pub(super) async fn commit_bookings(
        &self,
        state: &mut Snapshot,
        bookings: Vec<Booking>,
        cars: Option<Vec<Car>>,
    ) -> Result<(), EngineError> {
        self.persist(&bookings).await?;
        if let Some(cars) = &cars
            && let Err(e) = self.persist(cars).await
        {
            if let Err(undo) = self.persist(&state.bookings).await {
                tracing::error!(owner = self.owner(), error = %undo, "could not restore bookings table");
            }
            return Err(e);
        }
        state.bookings = bookings;
        if let Some(cars) = cars {
            state.cars = cars;
        }
        Ok(())
    }

    /// Replace the whole snapshot, e.g. when restoring a backup.
    pub async fn replace(&self, snapshot: Snapshot) -> Result<(), EngineError> {
        let mut guard = self.state.write().await;
        self.persist(&snapshot.cars).await?;
        self.persist(&snapshot.bookings).await?;
        self.persist(&snapshot.expenses).await?;
        self.persist(&snapshot.users).await?;
        *guard = snapshot;
        Ok(())
    }
}
