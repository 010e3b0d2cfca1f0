//! # Tipcast
//!
//! Multi-tenant prediction broadcast engine for round-based dice feeds.
//!
//! **Purpose:** Poll upstream feeds for finished rounds, keep a shared
//! per-feed history, derive the next-round call from configurable strategy
//! presets, and broadcast it to licensed subscribers while scoring every
//! published call against the round that follows.
//!
//! **Architecture:** One tokio poll task per (subscriber, feed) over shared
//! stores (licenses, subscriptions, history, accuracy), a single-flight feed
//! hub in front of the upstream HTTP feed, and an axum admin API with an SSE
//! event stream.

pub mod accuracy;
pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod feed;
pub mod history;
pub mod licensing;
pub mod predictor;
pub mod registry;
pub mod render;
pub mod supervisor;

pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
