use ulid::Ulid;

use crate::model::InvalidRange;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Overlapping live bookings; retry with the rebooking flag to accept them.
    Conflict(Vec<Ulid>),
    InvalidRange(InvalidRange),
    HasActiveBookings(Ulid),
    MissingField(&'static str),
    UserExists(String),
    Forbidden(&'static str),
    LimitExceeded(&'static str),
    InvalidOwner(String),
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(ids) => {
                let ids: Vec<String> = ids.iter().map(Ulid::to_string).collect();
                write!(
                    f,
                    "conflicts with bookings: {}; set rebooking = true to accept the overlap",
                    ids.join(", ")
                )
            }
            EngineError::InvalidRange(e) => write!(f, "invalid range: {e}"),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot delete car {id}: has pending or approved bookings")
            }
            EngineError::MissingField(field) => write!(f, "missing required field: {field}"),
            EngineError::UserExists(name) => write!(f, "user already exists: {name}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvalidOwner(name) => write!(f, "invalid owner name: {name:?}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidRange> for EngineError {
    fn from(e: InvalidRange) -> Self {
        EngineError::InvalidRange(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
