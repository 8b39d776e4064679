use crate::config::{ScannerConfig, ANONYMOUS_IDENTITY};
use crate::credentials::{CredentialError, CredentialStore};
use crate::extract::ExtractedContent;
use crate::verdict::ScanVerdict;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Body of a scan request sent to the classification service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    pub text: String,
    pub urls: Vec<String>,
    pub user: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Scan service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid scan response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid scan endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("Invalid scan id: {0}")]
    InvalidScanId(String),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// HTTP client for the remote classification service.
pub struct ScanClient {
    client: Client,
    scan_url: Url,
    base_url: String,
    report_path: String,
}

impl ScanClient {
    pub fn new(config: &ScannerConfig) -> Result<Self, ScanError> {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(seconds) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }
        let client = builder.build()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let scan_url = join(&base_url, &config.scan_path)?;

        Ok(Self {
            client,
            scan_url,
            base_url,
            report_path: config.report_path.clone(),
        })
    }

    pub async fn scan(&self, request: &ScanRequest, token: &str) -> Result<ScanVerdict, ScanError> {
        let response = self
            .client
            .post(self.scan_url.clone())
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ScanError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    pub async fn report(&self, scan_id: &str, token: &str) -> Result<(), ScanError> {
        let url = self.report_url(scan_id)?;
        let response = self.client.post(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    pub fn report_url(&self, scan_id: &str) -> Result<Url, ScanError> {
        let valid = !scan_id.is_empty()
            && scan_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ScanError::InvalidScanId(scan_id.to_string()));
        }
        join(&self.base_url, &self.report_path.replace("{scan_id}", scan_id))
    }
}

fn join(base: &str, path: &str) -> Result<Url, ScanError> {
    Ok(Url::parse(&format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?)
}

/// Sends extracted notification content for classification.
///
/// A missing token is not an error: the scan is skipped and `Ok(None)` is
/// returned without touching the network.
pub struct ScanDispatcher {
    client: ScanClient,
    credentials: Arc<dyn CredentialStore>,
    identity: RwLock<Option<String>>,
}

impl ScanDispatcher {
    pub fn new(client: ScanClient, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            credentials,
            identity: RwLock::new(None),
        }
    }

    pub fn set_identity(&self, identity: Option<String>) {
        match &identity {
            Some(user) => log::info!("Scan identity set to {user}"),
            None => log::info!("Scan identity cleared"),
        }
        *self.identity.write() = identity;
    }

    pub fn identity(&self) -> String {
        self.identity
            .read()
            .clone()
            .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string())
    }

    pub fn request_for(&self, content: &ExtractedContent) -> ScanRequest {
        ScanRequest {
            text: content.text.clone(),
            urls: content.links.clone(),
            user: self.identity(),
        }
    }

    pub async fn dispatch(&self, content: &ExtractedContent) -> Result<Option<ScanVerdict>, ScanError> {
        let Some(token) = self.credentials.token().await? else {
            log::warn!("Auth token not found. Scan skipped.");
            return Ok(None);
        };

        let request = self.request_for(content);
        log::debug!(
            "Dispatching scan: {} chars, {} link(s)",
            request.text.len(),
            request.urls.len()
        );
        let verdict = self.client.scan(&request, &token).await?;
        log::info!(
            "Scan result: show_warning={} category={} scan_id={}",
            verdict.show_warning,
            verdict.category(),
            verdict.scan_id.as_deref().unwrap_or("-")
        );
        Ok(Some(verdict))
    }

    /// Reports a scan as a confirmed threat. Returns `false` when skipped for
    /// lack of a token.
    pub async fn report_scan(&self, scan_id: &str) -> Result<bool, ScanError> {
        let Some(token) = self.credentials.token().await? else {
            log::warn!("Auth token not found. Cannot report scan {scan_id}.");
            return Ok(false);
        };
        self.client.report(scan_id, &token).await?;
        log::info!("Scan {scan_id} reported and blocked");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::extract::extract;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ScannerConfig {
        ScannerConfig {
            base_url: format!("{}/api/scan", server.uri()),
            ..ScannerConfig::default()
        }
    }

    fn dispatcher(server: &MockServer, token: Option<&str>) -> ScanDispatcher {
        let client = ScanClient::new(&config_for(server)).unwrap();
        ScanDispatcher::new(client, Arc::new(StaticCredentials::new(token)))
    }

    #[tokio::test]
    async fn test_dispatch_posts_content_with_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scan/notification/scan"))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(json!({
                "text": "Verify now",
                "urls": ["http://bit.ly/x"],
                "user": "user@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "show_warning": true,
                "combined_threat": {"description": "Phishing", "score": 0.9},
                "text_analysis": {"description": "Urgency"},
                "scan_id": "s1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, Some("tok"));
        dispatcher.set_identity(Some("user@example.com".to_string()));

        let verdict = dispatcher
            .dispatch(&extract(Some("Verify now http://bit.ly/x")))
            .await
            .unwrap()
            .unwrap();
        assert!(verdict.show_warning);
        assert_eq!(verdict.scan_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_anonymous_identity_by_default() {
        let server = MockServer::start().await;
        let dispatcher = dispatcher(&server, Some("tok"));
        let request = dispatcher.request_for(&extract(Some("hello")));
        assert_eq!(request.user, ANONYMOUS_IDENTITY);
    }

    #[tokio::test]
    async fn test_missing_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, None);
        let outcome = dispatcher.dispatch(&extract(Some("hello"))).await.unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scan/notification/scan"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"show_warning": true})),
            )
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, Some("tok"));
        let result = dispatcher.dispatch(&extract(Some("hello"))).await;
        assert!(matches!(result, Err(ScanError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_malformed_body_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, Some("tok"));
        let result = dispatcher.dispatch(&extract(Some("hello"))).await;
        assert!(matches!(result, Err(ScanError::Decode(_))));
    }

    #[tokio::test]
    async fn test_report_scan() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scan/manual/report/abc123/report"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = dispatcher(&server, Some("tok"));
        assert!(dispatcher.report_scan("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_report_without_token_is_skipped() {
        let server = MockServer::start().await;
        let dispatcher = dispatcher(&server, None);
        assert!(!dispatcher.report_scan("abc123").await.unwrap());
    }

    #[test]
    fn test_report_url_rejects_path_injection() {
        let client = ScanClient::new(&ScannerConfig::default()).unwrap();
        assert!(matches!(
            client.report_url("../admin"),
            Err(ScanError::InvalidScanId(_))
        ));
        assert_eq!(
            client.report_url("665f1c").unwrap().as_str(),
            "http://localhost:5000/api/scan/manual/report/665f1c/report"
        );
    }
}
