//! Typed events of the store's streaming protocol.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use super::sse::Frame;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Replace the node at `path` (relative to the subscribed location).
    Put { path: String, data: Value },
    /// Merge the children of `data` into the node at `path`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server revoked read access to the location.
    Cancel(String),
    /// The credential expired or was revoked.
    AuthRevoked(String),
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

impl StoreEvent {
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.event.as_str() {
            "put" | "patch" => {
                let body: PathData = serde_json::from_str(&frame.data)
                    .with_context(|| format!("Malformed '{}' payload", frame.event))?;
                Ok(if frame.event == "put" {
                    StoreEvent::Put {
                        path: body.path,
                        data: body.data,
                    }
                } else {
                    StoreEvent::Patch {
                        path: body.path,
                        data: body.data,
                    }
                })
            }
            "keep-alive" => Ok(StoreEvent::KeepAlive),
            "cancel" => Ok(StoreEvent::Cancel(reason(&frame.data))),
            "auth_revoked" => Ok(StoreEvent::AuthRevoked(reason(&frame.data))),
            other => bail!("Unknown stream event '{other}'"),
        }
    }

    /// Why the server closed the subscription for good, if it did.
    pub fn termination_reason(&self) -> Option<&str> {
        match self {
            StoreEvent::Cancel(reason) | StoreEvent::AuthRevoked(reason) => Some(reason.as_str()),
            _ => None,
        }
    }
}

fn reason(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(Value::Null) => "no reason given".to_string(),
        _ if data.trim().is_empty() => "no reason given".to_string(),
        _ => data.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, data: &str) -> Frame {
        Frame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_put_and_patch() {
        let put = StoreEvent::from_frame(&frame("put", r#"{"path":"/m1","data":{"x":1}}"#)).unwrap();
        assert_eq!(
            put,
            StoreEvent::Put {
                path: "/m1".into(),
                data: json!({"x": 1})
            }
        );

        let patch = StoreEvent::from_frame(&frame("patch", r#"{"path":"/","data":{"m2":null}}"#)).unwrap();
        assert!(matches!(patch, StoreEvent::Patch { ref path, .. } if path == "/"));
    }

    #[test]
    fn test_control_events() {
        assert_eq!(
            StoreEvent::from_frame(&frame("keep-alive", "null")).unwrap(),
            StoreEvent::KeepAlive
        );
        let cancel = StoreEvent::from_frame(&frame("cancel", "\"Permission denied\"")).unwrap();
        assert_eq!(cancel, StoreEvent::Cancel("Permission denied".into()));
        assert_eq!(cancel.termination_reason(), Some("Permission denied"));
        assert_eq!(StoreEvent::KeepAlive.termination_reason(), None);
        let revoked = StoreEvent::from_frame(&frame("auth_revoked", "credential is no longer valid")).unwrap();
        assert_eq!(revoked, StoreEvent::AuthRevoked("credential is no longer valid".into()));
    }

    #[test]
    fn test_bad_frames() {
        assert!(StoreEvent::from_frame(&frame("put", "not json")).is_err());
        assert!(StoreEvent::from_frame(&frame("rules_debug", "{}")).is_err());
    }
}
