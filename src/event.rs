use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A notification captured on the device by the native listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub package: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(with = "epoch_millis", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(package: impl Into<String>, title: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            title: title.map(str::to_string),
            text: Some(text.into()),
            timestamp: Utc::now(),
        }
    }

    /// Body text, with absent text treated as empty.
    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn has_body(&self) -> bool {
        !self.body().trim().is_empty()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            package: self.package.clone(),
            title: self.title.clone().unwrap_or_default(),
            body: self.body().trim().to_string(),
        }
    }
}

/// Dedup key for an event: package, title and trimmed body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub package: String,
    pub title: String,
    pub body: String,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.package, self.title, self.body)
    }
}

/// The Android listener posts `getPostTime()` as a double, so accept any JSON number.
mod epoch_millis {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.timestamp_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(millis as i64)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {millis}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Foreground,
    #[default]
    #[serde(alias = "inactive")]
    Background,
}

impl LifecycleState {
    pub fn is_foreground(self) -> bool {
        matches!(self, LifecycleState::Foreground)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Foreground => write!(f, "foreground"),
            LifecycleState::Background => write!(f, "background"),
        }
    }
}
