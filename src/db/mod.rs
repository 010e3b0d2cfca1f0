//! Database access layer
//!
//! SQLite persistence for licenses, subscriptions, accuracy counters, and
//! runtime settings. The stores keep their working state in memory and
//! write through here on every mutation.

pub mod accuracy;
pub mod init;
pub mod licenses;
pub mod settings;
pub mod subscriptions;

pub use init::{init_database, init_schema};
