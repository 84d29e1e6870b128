use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Typed view of the frames the notification backend pushes.
///
/// Channels deliver raw [`Value`]s; decode them with [`Notification::from_value`]
/// when the shape matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// ユーザー向け通知
    #[serde(alias = "notification_message", alias = "alert")]
    Notification(Alert),
    QuoteUpdate(QuoteUpdate),
    ClientUpdate(ClientUpdate),
    QuoteCreated(QuoteCreated),
    QuoteStatusChanged(QuoteStatusChanged),
    Activity(Activity),
    Pong {
        #[serde(default)]
        timestamp: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub quote_id: i64,
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub client_id: i64,
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteCreated {
    pub quote_id: i64,
    pub title: String,
    pub client: Value,
    /// decimal amount, sent as a string
    pub value: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteStatusChanged {
    pub quote_id: i64,
    pub old_status: String,
    pub new_status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub action: String,
    pub user: Value,
    pub entity: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Notification {
    /// Fails only when a known `type` arrives with a malformed body.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Notification::deserialize(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification(_) => "notification",
            Self::QuoteUpdate(_) => "quote_update",
            Self::ClientUpdate(_) => "client_update",
            Self::QuoteCreated(_) => "quote_created",
            Self::QuoteStatusChanged(_) => "quote_status_changed",
            Self::Activity(_) => "activity",
            Self::Pong { .. } => "pong",
            Self::Unknown => "unknown",
        }
    }
}

/// Keepalive frame; the backend answers with `pong`.
pub fn ping() -> Value {
    json!({ "type": "ping" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_quote_status_changed() {
        let value = json!({
            "type": "quote_status_changed",
            "quote_id": 12,
            "old_status": "sent",
            "new_status": "approved",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let notification = Notification::from_value(&value).unwrap();
        assert_eq!(
            notification,
            Notification::QuoteStatusChanged(QuoteStatusChanged {
                quote_id: 12,
                old_status: "sent".to_string(),
                new_status: "approved".to_string(),
                timestamp: Some("2024-05-01T10:00:00Z".to_string()),
            })
        );
        assert_eq!(notification.kind(), "quote_status_changed");
    }

    #[test]
    fn test_decode_alert_aliases() {
        for kind in ["notification", "notification_message", "alert"] {
            let value = json!({ "type": kind, "title": "Heads up", "message": "Quote expires" });
            match Notification::from_value(&value).unwrap() {
                Notification::Notification(alert) => {
                    assert_eq!(alert.title, "Heads up");
                    assert_eq!(alert.data, Value::Null);
                    assert!(alert.timestamp.is_none());
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_type_falls_back() {
        let value = json!({ "type": "something_new", "payload": [1, 2, 3] });
        assert_eq!(Notification::from_value(&value).unwrap(), Notification::Unknown);
    }

    #[test]
    fn test_known_type_with_missing_fields_fails() {
        let value = json!({ "type": "quote_update", "status": "sent" });
        assert!(Notification::from_value(&value).is_err());
    }

    #[test]
    fn test_pong_and_ping() {
        let pong = Notification::from_value(&json!({ "type": "pong" })).unwrap();
        assert_eq!(pong, Notification::Pong { timestamp: None });
        assert_eq!(ping(), json!({ "type": "ping" }));
    }
}
