use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use super::event::StoreEvent;
use super::sse::{EventStreamParser, Frame};
use super::{EventStream, RealtimeStore};
use crate::fetch::{HttpClient, fetch_bytes};

/// Builds `{database_url}/{path}.json`.
pub fn location_url(database_url: &str, path: &str) -> String {
    format!(
        "{}/{}.json",
        database_url.trim_end_matches('/'),
        path.trim_matches('/')
    )
}

/// Reads the current value at `path` once.
#[tracing::instrument(skip(client))]
pub async fn fetch_snapshot<C: HttpClient + ?Sized>(
    client: &C,
    database_url: &str,
    path: &str,
) -> Result<Value> {
    let url = location_url(database_url, path);
    let bytes = fetch_bytes(client, &url)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_slice(&bytes).context("Snapshot body is not JSON")
}

pub struct FirebaseStore<C> {
    client: C,
    database_url: String,
    idle_timeout: Duration,
}

impl<C: HttpClient> FirebaseStore<C> {
    /// `idle_timeout` bounds the silence between chunks. The server sends a
    /// keep-alive roughly every 30 seconds, so anything longer than that means
    /// the connection is dead.
    pub fn new(client: C, database_url: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            client,
            database_url: database_url.into(),
            idle_timeout,
        }
    }
}

#[async_trait]
impl<C: HttpClient> RealtimeStore for FirebaseStore<C> {
    async fn subscribe(&self, path: &str) -> Result<Box<dyn EventStream>> {
        let url = location_url(&self.database_url, path);
        let mut req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
        req.headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self.client.execute(req).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Subscription to {path} failed with status {status}: {body}");
        }
        debug!(path, %status, "Event stream opened");

        Ok(Box::new(FirebaseEventStream {
            response,
            parser: EventStreamParser::new(),
            pending: VecDeque::new(),
            idle_timeout: self.idle_timeout,
        }))
    }
}

struct FirebaseEventStream {
    response: reqwest::Response,
    parser: EventStreamParser,
    pending: VecDeque<Frame>,
    idle_timeout: Duration,
}

#[async_trait]
impl EventStream for FirebaseEventStream {
    async fn next_event(&mut self) -> Result<Option<StoreEvent>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                match StoreEvent::from_frame(&frame) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        warn!(error = %e, event = %frame.event, "Skipping undecodable frame");
                        continue;
                    }
                }
            }

            let chunk = tokio::time::timeout(self.idle_timeout, self.response.chunk())
                .await
                .with_context(|| format!("No data received for {:?}", self.idle_timeout))??;

            match chunk {
                Some(bytes) => self.pending.extend(self.parser.feed(&bytes)),
                None => return Ok(None),
            }
        }
    }
}
