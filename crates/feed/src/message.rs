use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A full message received or sent over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedMessage {
    pub topic: String,
    pub event: WireEvent,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub message_ref: Value,
}

/// Protocol events, Phoenix framing included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEvent {
    PostgresChanges,
    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,
    Heartbeat,
    System,
    Broadcast,
    PresenceState,
    PresenceDiff,
}

/// The kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row change delivered on a subscription. For deletes, `row`
/// carries the old record (often just its primary key).
#[derive(Debug, Clone)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub row: Value,
}

impl RowChange {
    pub fn insert(row: Value) -> Self {
        Self { kind: ChangeKind::Insert, row }
    }

    pub fn update(row: Value) -> Self {
        Self { kind: ChangeKind::Update, row }
    }

    pub fn delete(row: Value) -> Self {
        Self { kind: ChangeKind::Delete, row }
    }

    /// Extract a row change from a `postgres_changes` payload. The change
    /// body sits under `data`, with the row in `record` (insert/update) or
    /// `old_record` (delete).
    pub fn from_payload(payload: &Value) -> Option<RowChange> {
        let data = payload.get("data").unwrap_or(payload);
        let kind = match data.get("type").and_then(Value::as_str)? {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => return None,
        };
        let row = match kind {
            ChangeKind::Delete => data.get("old_record")?.clone(),
            _ => data.get("record")?.clone(),
        };
        Some(RowChange { kind, row })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_insert_payload() {
        let payload = json!({
            "data": {
                "type": "INSERT",
                "record": { "id": "i1", "name": "Milk" }
            }
        });
        let change = RowChange::from_payload(&payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.row["id"], "i1");
    }

    #[test]
    fn parses_delete_payload_from_old_record() {
        let payload = json!({
            "data": {
                "type": "DELETE",
                "old_record": { "id": "i9" }
            }
        });
        let change = RowChange::from_payload(&payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row["id"], "i9");
    }

    #[test]
    fn unknown_change_type_is_skipped() {
        let payload = json!({ "data": { "type": "TRUNCATE" } });
        assert!(RowChange::from_payload(&payload).is_none());
    }

    #[test]
    fn wire_events_use_protocol_names() {
        let json = serde_json::to_string(&WireEvent::PhoenixJoin).unwrap();
        assert_eq!(json, "\"phx_join\"");
        let event: WireEvent = serde_json::from_str("\"postgres_changes\"").unwrap();
        assert_eq!(event, WireEvent::PostgresChanges);
    }
}
