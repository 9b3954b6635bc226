use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Parameters sent with a credential request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionParams {
    pub model: String,
    pub voice: String,
}

/// Short-lived bearer token authorizing one signaling exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A credential without a known expiry is assumed valid.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
                now + margin < expires_at
            }
            None => true,
        }
    }

    pub fn is_valid(&self, margin: Duration) -> bool {
        self.is_valid_at(Utc::now(), margin)
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
