//! Admin HTTP API
//!
//! Axum router exposing license administration, task control, accuracy and
//! pattern queries, and the SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, AppContext};
