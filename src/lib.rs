pub mod auth;
pub mod backup;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod owner;
pub mod sql;
pub mod store;
pub mod tls;
pub mod wire;
