//! Status transition detection against the previously published state.

use bricksync_store::StateStore;

use crate::events::Severity;

/// Outcome of comparing a freshly built field against the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// No prior value, or the prior value is empty or identical.
    Unchanged,
    /// The record did not exist before. Informational; alerted only where
    /// the per-entity policy says so.
    Appeared { new: String },
    /// A real status transition.
    Changed { old: String, new: String },
}

/// Classify one tracked field for one entity.
///
/// Reads the record JSON previously published at `record_path` and
/// compares its `field` against `new_value`. A missing record (or any
/// read failure, which is indistinguishable from "no prior value" to this
/// pass) classifies as `Appeared`; an empty or equal stored value as
/// `Unchanged`; anything else as `Changed`.
pub async fn classify(
    store: &dyn StateStore,
    record_path: &str,
    field: &str,
    new_value: &str,
) -> Transition {
    let raw = match store.read(record_path).await {
        Ok(raw) => raw,
        Err(_) => {
            return Transition::Appeared {
                new: new_value.to_string(),
            }
        }
    };

    let old = stored_field(&raw, field);
    if old.is_empty() || old == new_value {
        Transition::Unchanged
    } else {
        Transition::Changed {
            old,
            new: new_value.to_string(),
        }
    }
}

fn stored_field(raw: &str, field: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get(field).cloned())
        .map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// Peer connected-state policy: anything but `"Connected"` warns.
pub fn peer_severity(new_status: &str) -> Severity {
    if new_status == "Connected" {
        Severity::Info
    } else {
        Severity::Warning
    }
}

/// Volume status policy: `"Stopped"` warns, everything else informs.
pub fn volume_severity(new_status: &str) -> Severity {
    if new_status == "Stopped" {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Brick status policy: `"Stopped"` warns, everything else informs.
pub fn brick_severity(new_status: &str) -> Severity {
    if new_status == "Stopped" {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bricksync_store::{MemStore, StateStore as _, WriteOptions};

    async fn store_with(path: &str, value: &str) -> MemStore {
        let store = MemStore::new();
        store
            .write(path, value, WriteOptions::default())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_classify_missing_record_appears() {
        let store = MemStore::new();
        let t = classify(&store, "clusters/c1/Peers/u1", "connected", "Connected").await;
        assert_eq!(
            t,
            Transition::Appeared {
                new: "Connected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_classify_equal_is_unchanged() {
        let store = store_with("clusters/c1/Peers/u1", r#"{"connected":"Connected"}"#).await;
        let t = classify(&store, "clusters/c1/Peers/u1", "connected", "Connected").await;
        assert_eq!(t, Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_classify_empty_stored_is_unchanged() {
        let store = store_with("clusters/c1/Peers/u1", r#"{"connected":""}"#).await;
        let t = classify(&store, "clusters/c1/Peers/u1", "connected", "disconnected").await;
        assert_eq!(t, Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_classify_change_detected() {
        let store = store_with("clusters/c1/Peers/u1", r#"{"connected":"disconnected"}"#).await;
        let t = classify(&store, "clusters/c1/Peers/u1", "connected", "Connected").await;
        assert_eq!(
            t,
            Transition::Changed {
                old: "disconnected".to_string(),
                new: "Connected".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_classify_unparseable_record_is_unchanged() {
        // a malformed stored record has no usable prior value
        let store = store_with("clusters/c1/Volumes/v1", "not json").await;
        let t = classify(&store, "clusters/c1/Volumes/v1", "status", "Started").await;
        assert_eq!(t, Transition::Unchanged);
    }

    #[test]
    fn test_peer_severity_policy() {
        assert_eq!(peer_severity("Connected"), Severity::Info);
        assert_eq!(peer_severity("disconnected"), Severity::Warning);
        assert_eq!(peer_severity("anything"), Severity::Warning);
    }

    #[test]
    fn test_volume_severity_policy() {
        assert_eq!(volume_severity("Stopped"), Severity::Warning);
        assert_eq!(volume_severity("Started"), Severity::Info);
    }

    #[test]
    fn test_brick_severity_policy() {
        assert_eq!(brick_severity("Stopped"), Severity::Warning);
        assert_eq!(brick_severity("Started"), Severity::Info);
    }
}
