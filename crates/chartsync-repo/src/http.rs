//! Archive repository downloads

use std::time::Duration;

use crate::error::{RepoError, Result};

/// Default request timeout for archive downloads
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for packaged chart archives
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

/// A downloaded archive and the URL that served it
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub url: String,
    pub data: Vec<u8>,
}

impl ArchiveFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self { client, timeout })
    }

    /// Download from the first URL that answers successfully
    ///
    /// Later URLs are tried only after a transport failure (connection
    /// error, timeout, non-success status). Anything else ends the attempt.
    pub async fn fetch_first(&self, urls: &[String]) -> Result<FetchedArchive> {
        let mut attempts = Vec::new();

        for url in urls {
            match self.get_bytes(url).await {
                Ok(data) => {
                    tracing::debug!(url = %url, bytes = data.len(), "downloaded chart archive");
                    return Ok(FetchedArchive {
                        url: url.clone(),
                        data,
                    });
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(url = %url, error = %e, "archive source unavailable, trying next");
                    attempts.push(format!("{}: {}", url, e));
                }
                Err(e) => return Err(e),
            }
        }

        if attempts.is_empty() {
            return Err(RepoError::InvalidUrl {
                url: String::new(),
                reason: "no archive URLs given".to_string(),
            });
        }

        Err(RepoError::AllSourcesFailed {
            attempts: attempts.join("; "),
        })
    }

    /// Fetch bytes from URL
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = url::Url::parse(url).map_err(|e| RepoError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                RepoError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                e.into()
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_falls_through_on_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.tgz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sample.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let fetcher = ArchiveFetcher::new(DEFAULT_TIMEOUT).unwrap();
        let urls = vec![
            format!("{}/missing.tgz", server.uri()),
            format!("{}/sample.tgz", server.uri()),
        ];
        let fetched = fetcher.fetch_first(&urls).await.unwrap();

        assert_eq!(fetched.url, urls[1]);
        assert_eq!(fetched.data, b"payload");
    }

    #[tokio::test]
    async fn test_all_sources_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = ArchiveFetcher::new(DEFAULT_TIMEOUT).unwrap();
        let urls = vec![
            format!("{}/a.tgz", server.uri()),
            format!("{}/b.tgz", server.uri()),
        ];
        let err = fetcher.fetch_first(&urls).await.unwrap_err();

        match err {
            RepoError::AllSourcesFailed { attempts } => {
                assert!(attempts.contains("a.tgz"));
                assert!(attempts.contains("b.tgz"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_stops_immediately() {
        let fetcher = ArchiveFetcher::new(DEFAULT_TIMEOUT).unwrap();
        let err = fetcher
            .fetch_first(&["wrongurl".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidUrl { .. }));
    }
}
