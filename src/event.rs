use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Outcome recorded for a redirect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Redirect,
    Error,
}

/// Flat per-request record, emitted as one JSON line
#[derive(Debug, Clone, Serialize)]
pub struct RedirectEvent {
    pub pool_id: String,
    pub requested_path: String,
    pub client_ip: String,
    pub datetime: String,
    pub event: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirected_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_headers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RedirectEvent {
    pub fn redirect(
        pool_id: &str,
        requested_path: &str,
        client_ip: &str,
        at: DateTime<Utc>,
        redirected_to: &str,
        headers: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            redirected_to: Some(redirected_to.to_string()),
            custom_headers: Some(render_headers(headers)),
            ..Self::base(pool_id, requested_path, client_ip, at, EventKind::Redirect)
        }
    }

    pub fn error(
        pool_id: &str,
        requested_path: &str,
        client_ip: &str,
        at: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::base(pool_id, requested_path, client_ip, at, EventKind::Error)
        }
    }

    fn base(
        pool_id: &str,
        requested_path: &str,
        client_ip: &str,
        at: DateTime<Utc>,
        event: EventKind,
    ) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            requested_path: requested_path.to_string(),
            client_ip: client_ip.to_string(),
            datetime: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            event,
            redirected_to: None,
            custom_headers: None,
            error_message: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Hands the record to the tracing subscriber
    pub fn emit(&self) {
        let record = match self.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!("Error serializing redirect event: {err}");
                return;
            }
        };

        match self.event {
            EventKind::Redirect => info!(target: "redirect_event", "{record}"),
            EventKind::Error => warn!(target: "redirect_event", "{record}"),
        }
    }
}

/// `Name: value, Name2: value2`, sorted by name
fn render_headers(headers: &BTreeMap<String, String>) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join(", ")
}
