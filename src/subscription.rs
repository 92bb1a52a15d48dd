//! Live, flattened view of the trips of one cooperative.
//!
//! A background task owns the store connection and the local copy of the
//! subtree. Every pushed change is flattened from scratch and published
//! through a `watch` channel, so readers always see the latest complete view
//! and never a partial merge.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::backoff::{BackoffPolicy, RetryPolicy};
use crate::flatten::TripView;
use crate::fetch::HttpClient;
use crate::realtime::{LocalTree, RealtimeStore, StoreEvent, fetch_snapshot};

/// Characters the store does not allow in a key.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No cooperative selected, nothing subscribed.
    Idle,
    Connecting,
    Live,
    Reconnecting { attempt: usize, last_error: String },
    /// The subscription ended and will not be retried.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct FeedState {
    /// Latest raw subtree as pushed by the store.
    pub snapshot: Arc<Value>,
    pub trips: TripView,
    pub status: ConnectionStatus,
    /// When the last data push was applied.
    pub updated_at: Option<DateTime<Utc>>,
    /// When the server was last heard from, keep-alives included.
    pub last_seen: Option<DateTime<Utc>>,
    /// Number of data pushes applied so far.
    pub revision: u64,
}

impl FeedState {
    fn new(status: ConnectionStatus) -> Self {
        Self {
            snapshot: Arc::new(Value::Null),
            trips: TripView::default(),
            status,
            updated_at: None,
            last_seen: None,
            revision: 0,
        }
    }

    /// True when the view can no longer be trusted to be current: the
    /// connection is not live, or the server has been silent for longer than
    /// `max_staleness`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_staleness: TimeDelta) -> bool {
        match self.status {
            ConnectionStatus::Idle => false,
            ConnectionStatus::Live => self
                .last_seen
                .is_none_or(|seen| now - seen > max_staleness),
            _ => true,
        }
    }
}

/// Edge-triggered staleness warning: fires once when the feed turns stale
/// and re-arms when it is fresh again. The initial `Connecting` phase never
/// fires.
#[derive(Debug, Clone)]
pub struct StalenessAlarm {
    max_staleness: TimeDelta,
    stale: bool,
}

impl StalenessAlarm {
    pub fn new(max_staleness_secs: u64) -> Result<Self> {
        let max_staleness = i64::try_from(max_staleness_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .with_context(|| format!("Staleness window of {max_staleness_secs}s is too large"))?;
        Ok(Self {
            max_staleness,
            stale: false,
        })
    }

    /// Returns `true` when `state` has just become stale.
    pub fn observe(&mut self, state: &FeedState, now: DateTime<Utc>) -> bool {
        let stale =
            state.status != ConnectionStatus::Connecting && state.is_stale(now, self.max_staleness);
        let fired = stale && !self.stale;
        self.stale = stale;
        fired
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Store path under which cooperatives are keyed.
    pub root: String,
    pub retry: RetryPolicy,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            root: "viagensEmAndamento".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Handle to a running subscription. Dropping it tears the subscription down.
pub struct TripFeed {
    cooperative_id: String,
    rx: watch::Receiver<FeedState>,
    task: Option<JoinHandle<()>>,
}

impl TripFeed {
    /// Subscribes to the trips of `cooperative_id`.
    ///
    /// A blank id establishes nothing and yields a permanently empty,
    /// [`ConnectionStatus::Idle`] feed. Ids the store cannot address are
    /// rejected.
    pub fn subscribe(
        store: Arc<dyn RealtimeStore>,
        cooperative_id: &str,
        options: SubscriptionOptions,
    ) -> Result<Self> {
        let Some(cooperative_id) = validate_cooperative_id(cooperative_id)? else {
            debug!("No cooperative selected, not subscribing");
            let (_tx, rx) = watch::channel(FeedState::new(ConnectionStatus::Idle));
            return Ok(Self {
                cooperative_id: String::new(),
                rx,
                task: None,
            });
        };

        let path = subscription_path(&options.root, &cooperative_id);
        let (tx, rx) = watch::channel(FeedState::new(ConnectionStatus::Connecting));

        let span = tracing::info_span!("trip_feed", cooperative_id = %cooperative_id, path = %path);
        let task = tokio::spawn(run(store, path, tx, options.retry).instrument(span));

        Ok(Self {
            cooperative_id,
            rx,
            task: Some(task),
        })
    }

    pub fn current(&self) -> FeedState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published state. Returns `None` once the
    /// subscription has ended and its final state was already observed.
    pub async fn changed(&mut self) -> Option<FeedState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(cooperative_id = %self.cooperative_id, "Subscription closed");
        }
    }
}

impl Drop for TripFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// Trims a cooperative id. Blank ids mean "no cooperative selected" and
/// yield `None`; ids the store cannot use as a key are rejected.
pub fn validate_cooperative_id(raw: &str) -> Result<Option<String>> {
    let id = raw.trim();
    if id.is_empty() {
        return Ok(None);
    }
    if id.contains(FORBIDDEN_KEY_CHARS) {
        bail!("Cooperative id '{id}' is not a valid store key");
    }
    Ok(Some(id.to_string()))
}

/// Reads the current subtree of a cooperative once.
///
/// A blank id reads nothing and returns `null`, which flattens to an empty
/// trip list.
pub async fn fetch_cooperative_snapshot<C: HttpClient + ?Sized>(
    client: &C,
    database_url: &str,
    root: &str,
    cooperative_id: &str,
) -> Result<Value> {
    match validate_cooperative_id(cooperative_id)? {
        Some(id) => fetch_snapshot(client, database_url, &subscription_path(root, &id)).await,
        None => {
            debug!("No cooperative selected, not reading");
            Ok(Value::Null)
        }
    }
}

/// Store path of a cooperative's trip feed.
pub fn subscription_path(root: &str, cooperative_id: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        cooperative_id.to_string()
    } else {
        format!("{root}/{cooperative_id}")
    }
}

enum StreamEnd {
    /// Connection lost or never established; worth retrying.
    Disconnected(String),
    /// Server refused the subscription.
    Terminated(String),
}

async fn run(
    store: Arc<dyn RealtimeStore>,
    path: String,
    tx: watch::Sender<FeedState>,
    retry: RetryPolicy,
) {
    let mut tree = LocalTree::new();
    let mut attempt = 0usize;

    loop {
        let end = match store.subscribe(&path).await {
            Ok(mut stream) => {
                info!("Subscribed");
                let mut received = false;
                loop {
                    match stream.next_event().await {
                        Ok(Some(event)) => {
                            if let Some(reason) = event.termination_reason() {
                                break StreamEnd::Terminated(reason.to_string());
                            }
                            if !received {
                                received = true;
                                attempt = 0;
                            }
                            apply_event(&mut tree, &event, &tx);
                        }
                        Ok(None) => {
                            break StreamEnd::Disconnected(
                                "server closed the stream".to_string(),
                            );
                        }
                        Err(e) => break StreamEnd::Disconnected(format!("{e:#}")),
                    }
                }
            }
            Err(e) => StreamEnd::Disconnected(format!("{e:#}")),
        };

        match end {
            StreamEnd::Terminated(reason) => {
                error!(reason = %reason, "Subscription terminated by server");
                tx.send_modify(|s| s.status = ConnectionStatus::Failed { reason });
                return;
            }
            StreamEnd::Disconnected(last_error) => {
                attempt += 1;
                if !retry.allows(attempt) {
                    error!(attempt, error = %last_error, "Giving up on subscription");
                    tx.send_modify(|s| {
                        s.status = ConnectionStatus::Failed { reason: last_error }
                    });
                    return;
                }

                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Subscription lost, reconnecting"
                );
                tx.send_modify(|s| {
                    s.status = ConnectionStatus::Reconnecting {
                        attempt,
                        last_error,
                    }
                });
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn apply_event(tree: &mut LocalTree, event: &StoreEvent, tx: &watch::Sender<FeedState>) {
    let now = Utc::now();
    match tree.apply(event) {
        Some(snapshot) => {
            // Each push replaces the whole view.
            let trips = TripView::from_snapshot(&snapshot);
            debug!(active_trips = trips.len(), "Snapshot applied");
            tx.send_modify(|s| {
                s.snapshot = snapshot;
                s.trips = trips;
                s.status = ConnectionStatus::Live;
                s.updated_at = Some(now);
                s.last_seen = Some(now);
                s.revision += 1;
            });
        }
        None => {
            // Keep-alives refresh liveness without waking readers.
            tx.send_if_modified(|s| {
                s.last_seen = Some(now);
                false
            });
        }
    }
}
