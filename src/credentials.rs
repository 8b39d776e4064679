use crate::config::CredentialsConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to read token file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of the session token used to authenticate scan requests.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` means the user is signed out.
    async fn token(&self) -> Result<Option<String>, CredentialError>;
}

/// Fixed token, mostly useful for tests and one-shot CLI runs.
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: Option<&str>) -> Self {
        Self(token.map(str::to_string))
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn token(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.0.clone())
    }
}

/// Reads the token from disk on every call so a sign-in or sign-out made by
/// the app is picked up without restarting the pipeline.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn token(&self) -> Result<Option<String>, CredentialError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let token = content.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

pub fn from_config(config: &CredentialsConfig) -> Arc<dyn CredentialStore> {
    if let Some(token) = config.token.as_deref() {
        return Arc::new(StaticCredentials::new(Some(token)));
    }
    match &config.token_file {
        Some(path) => Arc::new(FileCredentialStore::new(path.clone())),
        None => {
            log::warn!("No credential source configured, scans will be skipped");
            Arc::new(StaticCredentials::new(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_reads_trimmed_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "abc123\n").unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.token().await.unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_missing_or_blank_file_means_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.token().await.unwrap(), None);

        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(store.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_inline_token_wins() {
        let config = CredentialsConfig {
            token_file: Some(PathBuf::from("/nonexistent/token")),
            token: Some("inline".to_string()),
        };
        let store = from_config(&config);
        assert_eq!(store.token().await.unwrap().as_deref(), Some("inline"));
    }
}
