//! Network collaborator used to populate the cache

use crate::config::MAX_REDIRECTS;
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0";

/// Body and content type of a successful download
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<FetchedBytes>;

    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// reqwest-backed fetcher with a bounded redirect policy and timeout
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with a 15 second timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url = %url, "Fetching");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, url = %url, "Fetch returned non-success status");
            return Err(CacheError::Status(status.as_u16()));
        }

        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<FetchedBytes> {
        let response = self.get(url).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?.to_vec();

        debug!(
            url = %url,
            size = bytes.len(),
            content_type = ?content_type,
            "Fetched bytes"
        );

        Ok(FetchedBytes {
            bytes,
            content_type,
        })
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        let text = response.text().await?;
        debug!(url = %url, size = text.len(), "Fetched text");
        Ok(text)
    }
}

/// Follow up to `MAX_REDIRECTS` hops, failing on the next one
fn redirect_policy() -> redirect::Policy {
    redirect::Policy::custom(|attempt| {
        // `previous` includes the original request URL
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `responses` in order, one per accepted connection
    async fn serve(responses: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    /// Same policy as production, but never routed through an env proxy
    fn loopback_fetcher() -> HttpFetcher {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .redirect(redirect_policy())
            .user_agent(USER_AGENT)
            .no_proxy()
            .build()
            .unwrap();
        HttpFetcher { client }
    }

    fn ok(content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            content_type,
            body.len(),
            body
        )
    }

    fn redirect_to(location: &str) -> String {
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            location
        )
    }

    #[tokio::test]
    async fn test_fetch_bytes_reports_content_type() {
        let base = serve(vec![ok("image/png", "png-bytes")]).await;
        let fetcher = loopback_fetcher();

        let fetched = fetcher.fetch_bytes(&format!("{}/logo", base)).await.unwrap();
        assert_eq!(fetched.bytes, b"png-bytes");
        assert_eq!(fetched.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let base = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
        ])
        .await;
        let fetcher = loopback_fetcher();

        let err = fetcher.fetch_text(&format!("{}/x", base)).await.unwrap_err();
        assert!(matches!(err, CacheError::Status(404)));
    }

    #[tokio::test]
    async fn test_follows_redirect() {
        let base = serve(vec![redirect_to("/final"), ok("application/json", "{}")]).await;
        let fetcher = loopback_fetcher();

        let text = fetcher.fetch_text(&format!("{}/start", base)).await.unwrap();
        assert_eq!(text, "{}");
    }

    #[tokio::test]
    async fn test_redirect_limit_is_inclusive() {
        let mut responses: Vec<String> = (0..MAX_REDIRECTS).map(|_| redirect_to("/again")).collect();
        responses.push(ok("application/json", "[1]"));
        let base = serve(responses).await;
        let fetcher = loopback_fetcher();

        let text = fetcher.fetch_text(&format!("{}/start", base)).await.unwrap();
        assert_eq!(text, "[1]");
    }

    #[tokio::test]
    async fn test_too_many_redirects() {
        let hops = (0..=MAX_REDIRECTS).map(|_| redirect_to("/again")).collect();
        let base = serve(hops).await;
        let fetcher = loopback_fetcher();

        let err = fetcher.fetch_text(&format!("{}/start", base)).await.unwrap_err();
        assert!(matches!(err, CacheError::TooManyRedirects));
    }
}
