//! Shared fixtures for tipcast integration tests
//!
//! - TestEngine: full engine (stores, supervisor, router) on an in-memory database
//! - ScriptedFeed: feed source whose answers the test controls
//! - RecordingSink: notification sink that records instead of sending

pub mod test_engine;

// Re-export commonly used types
pub use test_engine::{EventStream, RecordingSink, ScriptedFeed, TestEngine};
