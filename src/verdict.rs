use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Classification returned by the remote scan service.
///
/// Fields beyond the ones the pipeline inspects are kept in `extra` so the
/// verdict can be attached to a platform notification and replayed verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanVerdict {
    #[serde(default)]
    pub show_warning: bool,
    #[serde(default)]
    pub combined_threat: CombinedThreat,
    #[serde(default)]
    pub text_analysis: TextAnalysis,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub scan_id: Option<String>,
    #[serde(
        default,
        rename = "threatCategory",
        alias = "threat_category",
        skip_serializing_if = "Option::is_none"
    )]
    pub threat_category: Option<ThreatCategory>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CombinedThreat {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextAnalysis {
    #[serde(default)]
    pub description: Option<String>,
}

impl ScanVerdict {
    pub fn warning(description: &str, score: f64) -> Self {
        Self {
            show_warning: true,
            combined_threat: CombinedThreat {
                description: Some(description.to_string()),
                score: Some(score),
            },
            ..Self::default()
        }
    }

    /// Category reported by the service, or the one implied by the warning flag.
    pub fn category(&self) -> ThreatCategory {
        match self.threat_category {
            Some(category) => category,
            None if self.show_warning => ThreatCategory::Suspicious,
            None => ThreatCategory::Legitimate,
        }
    }

    pub fn description(&self) -> &str {
        self.combined_threat
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("Potential threat found")
    }

    /// Score formatted for display; absent scores render as "unknown".
    pub fn score_label(&self) -> String {
        match self.combined_threat.score {
            Some(score) => format!("{score}"),
            None => "unknown".to_string(),
        }
    }
}

/// Closed set of threat categories. Unrecognised labels from the service are
/// mapped to `Suspicious` at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatCategory {
    Critical,
    Suspicious,
    Legitimate,
}

impl ThreatCategory {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => ThreatCategory::Critical,
            "legitimate" => ThreatCategory::Legitimate,
            "suspicious" => ThreatCategory::Suspicious,
            other => {
                log::warn!("Unrecognised threat category '{other}', treating as suspicious");
                ThreatCategory::Suspicious
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ThreatCategory::Critical => "Critical",
            ThreatCategory::Suspicious => "Suspicious",
            ThreatCategory::Legitimate => "Legitimate",
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            ThreatCategory::Critical => "Scam Alert",
            ThreatCategory::Suspicious => "Potential Threat",
            ThreatCategory::Legitimate => "Legitimate",
        }
    }

    pub fn severity(self) -> &'static str {
        match self {
            ThreatCategory::Critical => "High",
            ThreatCategory::Suspicious => "Medium",
            ThreatCategory::Legitimate => "Low",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ThreatCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ThreatCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ThreatCategory::from_label(&label))
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!("invalid scan id: {other}"))),
    }
}

/// Scores arrive either as numbers or as percentage strings such as "87%".
fn lenient_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            let (digits, percent) = match trimmed.strip_suffix('%') {
                Some(digits) => (digits.trim(), true),
                None => (trimmed, false),
            };
            let value: f64 = digits
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid score: {s}")))?;
            Ok(Some(if percent { value / 100.0 } else { value }))
        }
        Some(other) => Err(de::Error::custom(format!("invalid score: {other}"))),
    }
}
