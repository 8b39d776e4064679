use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

pub const ANONYMOUS_IDENTITY: &str = "anonymous@device";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Signed-in user; scans are attributed to `anonymous@device` otherwise.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub socket_path: String,
    /// Directory the native side spools events into while nothing is listening.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/guardspire.sock".to_string(),
            spool_dir: Some(PathBuf::from("/var/spool/guardspire")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub base_url: String,
    #[serde(default = "default_scan_path")]
    pub scan_path: String,
    /// `{scan_id}` is substituted with the id of the reported scan.
    #[serde(default = "default_report_path")]
    pub report_path: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// No timeout unless set; a hung scan only stalls its own task.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_scan_path() -> String {
    "/notification/scan".to_string()
}

fn default_report_path() -> String {
    "/manual/report/{scan_id}/report".to_string()
}

fn default_user_agent() -> String {
    format!("GuardSpire/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/scan".to_string(),
            scan_path: default_scan_path(),
            report_path: default_report_path(),
            user_agent: default_user_agent(),
            timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// File holding the session token written by the sign-in flow.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Inline token, takes precedence over `token_file`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_file: Some(PathBuf::from("/var/lib/guardspire/token")),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One cooldown shared by every source package.
    #[default]
    Global,
    PerPackage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_retention_seconds")]
    pub retention_seconds: u64,
    #[serde(default)]
    pub cooldown_scope: CooldownScope,
}

fn default_cooldown_seconds() -> u64 {
    10
}

fn default_retention_seconds() -> u64 {
    15
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_seconds(),
            retention_seconds: default_retention_seconds(),
            cooldown_scope: CooldownScope::Global,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub channel_id: String,
    pub channel_name: String,
    #[serde(default = "default_importance")]
    pub importance: u8,
    #[serde(default = "default_true")]
    pub vibrate: bool,
    #[serde(default = "default_vibration_ms")]
    pub vibration_ms: u64,
    #[serde(default = "default_light_color")]
    pub light_color: String,
    /// Deep link opened by the "View" action.
    #[serde(default = "default_alert_link")]
    pub alert_link: String,
}

fn default_importance() -> u8 {
    4
}

fn default_vibration_ms() -> u64 {
    1000
}

fn default_light_color() -> String {
    "#FF0000".to_string()
}

fn default_alert_link() -> String {
    "guardspire://scam-alert".to_string()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            channel_id: "scam-alerts".to_string(),
            channel_name: "Scam Alerts".to_string(),
            importance: default_importance(),
            vibrate: true,
            vibration_ms: default_vibration_ms(),
            light_color: default_light_color(),
            alert_link: default_alert_link(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.scanner.base_url)
            .map_err(|e| anyhow::anyhow!("invalid scanner base_url '{}': {e}", self.scanner.base_url))?;
        if !self.scanner.report_path.contains("{scan_id}") {
            anyhow::bail!("scanner report_path must contain {{scan_id}}");
        }
        if self.guard.retention_seconds == 0 {
            anyhow::bail!("guard retention_seconds must be greater than zero");
        }
        if self.poller.enabled && self.poller.interval_seconds == 0 {
            anyhow::bail!("poller interval_seconds must be greater than zero");
        }
        if self.bridge.socket_path.trim().is_empty() {
            anyhow::bail!("bridge socket_path must not be empty");
        }
        Ok(())
    }

    pub fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or(ANONYMOUS_IDENTITY)
    }
}
