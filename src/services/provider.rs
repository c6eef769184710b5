use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Source of result resources for jobs.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Fetch one resource matching `query` and return its URL.
    async fn fetch(&self, query: &str) -> Result<String, ProviderError>;
}

/// Client for the Unsplash random photo API.
pub struct UnsplashClient {
    http: Client,
    base_url: String,
    access_key: String,
}

#[derive(Deserialize)]
struct RandomPhoto {
    urls: PhotoUrls,
}

#[derive(Deserialize)]
struct PhotoUrls {
    regular: String,
}

impl UnsplashClient {
    pub fn new(
        base_url: &str,
        access_key: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("job-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
        })
    }
}

#[async_trait]
impl ContentProvider for UnsplashClient {
    async fn fetch(&self, query: &str) -> Result<String, ProviderError> {
        let url = format!("{}/photos/random", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query),
                ("count", "1"),
                ("client_id", self.access_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let photos: Vec<RandomPhoto> = response.json().await?;

        photos
            .into_iter()
            .next()
            .map(|photo| photo.urls.regular)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ProviderError::Malformed("response contained no photo URL".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}
