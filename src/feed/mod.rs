//! Feed polling: wire types, HTTP client, and the shared fetch hub

mod client;
mod hub;
mod types;

pub use client::{FeedSource, HttpFeedClient};
pub use hub::FeedHub;
pub use types::{FeedError, Outcome, RawRound, RoundSnapshot};
