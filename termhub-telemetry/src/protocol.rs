//! Messages de contrôle JSON échangés en trames texte.
//!
//! Union fermée : `ping`, `pong`, `connected`, `error`, `closed`.
//! Tout autre `type` est décodé en `Unknown` et ignoré par l'appelant.

use serde::{Deserialize, Serialize};

/// Charge utile d'un écho ping/pong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_recv_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_send_ts: Option<i64>,
}

impl Echo {
    pub fn request(ts: i64) -> Self {
        Self { ts, server_recv_ts: None, server_send_ts: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Ping(Echo),
    Pong(Echo),
    Connected {
        #[serde(default, rename = "serverId", skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Closed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
