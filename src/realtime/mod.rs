//! Client side of the realtime store's streaming REST protocol.
//!
//! [`RealtimeStore`] opens a path subscription and [`EventStream`] yields the
//! typed events pushed over it. [`FirebaseStore`] talks to the real service;
//! tests substitute scripted implementations.

pub mod client;
pub mod event;
pub mod sse;
pub mod tree;

pub use client::{FirebaseStore, fetch_snapshot, location_url};
pub use event::StoreEvent;
pub use tree::LocalTree;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Opens a push subscription on `path`.
    async fn subscribe(&self, path: &str) -> Result<Box<dyn EventStream>>;
}

#[async_trait]
pub trait EventStream: Send {
    /// Next event, or `Ok(None)` once the server closed the stream.
    async fn next_event(&mut self) -> Result<Option<StoreEvent>>;
}
