//! Source resolution into the chart cache

use async_trait::async_trait;
use chartsync_core::archive::{compute_digest, extract_archive_bytes, find_chart_root};
use chartsync_core::{ChartSource, GitSource, LoadedChart, RepoSource};
use std::path::PathBuf;

use crate::cache::ChartCache;
use crate::config::CacheConfig;
use crate::error::{RepoError, Result};
use crate::git::{GitFetcher, copy_subpath};
use crate::http::{ArchiveFetcher, DEFAULT_TIMEOUT};

/// Materializes chart content for a source into a local directory
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Fetch `source` into the cache entry for `chart_name` and return its path.
    ///
    /// Re-resolving the same source is always safe and overwrites the entry.
    async fn resolve(&self, source: &ChartSource, chart_name: &str) -> Result<PathBuf>;
}

/// Resolver backed by HTTP archive downloads, git checkouts and a [`ChartCache`]
#[derive(Debug, Clone)]
pub struct ChartResolver {
    cache: ChartCache,
    archives: ArchiveFetcher,
    git: GitFetcher,
}

impl ChartResolver {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            cache: ChartCache::new(config)?,
            archives: ArchiveFetcher::new(DEFAULT_TIMEOUT)?,
            git: GitFetcher::default(),
        })
    }

    pub fn with_git(mut self, git: GitFetcher) -> Self {
        self.git = git;
        self
    }

    pub fn cache(&self) -> &ChartCache {
        &self.cache
    }

    async fn resolve_archive(&self, repo: &RepoSource, chart_name: &str) -> Result<PathBuf> {
        let fetched = self.archives.fetch_first(&repo.urls).await?;
        let digest = compute_digest(&fetched.data);
        let cache = self.cache.clone();
        let name = chart_name.to_string();
        let url = fetched.url;
        let data = fetched.data;

        blocking(move || {
            if cache.recorded_digest(&name).as_deref() == Some(digest.as_str())
                && cache.load(&name).is_ok()
            {
                tracing::debug!(chart = %name, digest = %digest, "archive unchanged");
                return cache.path_for(&name);
            }

            let staging = cache.stage()?;
            extract_archive_bytes(&data, staging.path())?;
            let chart_root = find_chart_root(staging.path())?;
            LoadedChart::load(&chart_root)?;

            cache.record_digest(&name, None)?;
            let path = cache.replace(&name, &chart_root)?;
            cache.record_digest(&name, Some(&digest))?;

            tracing::info!(chart = %name, url = %url, digest = %digest, "chart archive extracted");
            Ok(path)
        })
        .await
    }

    async fn resolve_git(&self, git: &GitSource, chart_name: &str) -> Result<PathBuf> {
        let staging = self.cache.stage()?;
        let checkout = staging.path().join("checkout");
        let url = self.git.clone_first(&git.urls, &checkout).await?;

        let cache = self.cache.clone();
        let name = chart_name.to_string();
        let subpath = git.subpath().to_string();
        blocking(move || {
            let chart_dir = staging.path().join("chart");
            copy_subpath(&checkout, &subpath, &chart_dir, &url)?;
            LoadedChart::load(&chart_dir)?;

            cache.record_digest(&name, None)?;
            let path = cache.replace(&name, &chart_dir)?;

            tracing::info!(chart = %name, url = %url, path = %subpath, "chart checked out");
            Ok(path)
        })
        .await
    }
}

/// Run filesystem work on the blocking pool so the caller's deadline can
/// still fire while it runs
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RepoError::CacheError {
            message: format!("cache task failed: {}", e),
        })?
}

#[async_trait]
impl SourceResolver for ChartResolver {
    async fn resolve(&self, source: &ChartSource, chart_name: &str) -> Result<PathBuf> {
        self.cache.path_for(chart_name)?;
        match source {
            ChartSource::Repo(repo) => self.resolve_archive(repo, chart_name).await,
            ChartSource::Git(git) => self.resolve_git(git, chart_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_core::archive::create_archive_bytes;
    use std::path::Path;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chart_archive(version: &str) -> Vec<u8> {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("templates")).unwrap();
        std::fs::write(
            temp.path().join("Chart.yaml"),
            format!("apiVersion: v2\nname: sample\nversion: {}\n", version),
        )
        .unwrap();
        std::fs::write(temp.path().join("templates").join("cm.yaml"), "kind: ConfigMap\n").unwrap();
        create_archive_bytes(temp.path(), "sample").unwrap()
    }

    fn resolver_in(dir: &Path) -> ChartResolver {
        ChartResolver::new(&CacheConfig::new(Some(dir.to_path_buf()))).unwrap()
    }

    fn repo(urls: Vec<String>) -> ChartSource {
        ChartSource::Repo(RepoSource { urls })
    }

    async fn serve(server: &MockServer, route: &str, status: u16, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resolve_archive_unwraps_top_level_dir() {
        let server = MockServer::start().await;
        serve(&server, "/sample-0.1.0.tgz", 200, chart_archive("0.1.0")).await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let path = resolver
            .resolve(&repo(vec![format!("{}/sample-0.1.0.tgz", server.uri())]), "sample")
            .await
            .unwrap();

        assert_eq!(path, temp.path().join("sample"));
        assert!(path.join("Chart.yaml").exists());
        assert!(path.join("templates").join("cm.yaml").exists());
    }

    #[tokio::test]
    async fn test_second_url_used_after_transport_failure() {
        let server = MockServer::start().await;
        serve(&server, "/down.tgz", 500, Vec::new()).await;
        serve(&server, "/up.tgz", 200, chart_archive("0.1.0")).await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let urls = vec![
            format!("{}/down.tgz", server.uri()),
            format!("{}/up.tgz", server.uri()),
        ];
        assert!(resolver.resolve(&repo(urls), "sample").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_archive_not_retried_elsewhere() {
        let server = MockServer::start().await;
        serve(&server, "/broken.tgz", 200, b"not an archive".to_vec()).await;
        Mock::given(method("GET"))
            .and(path("/good.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(chart_archive("0.1.0")))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let urls = vec![
            format!("{}/broken.tgz", server.uri()),
            format!("{}/good.tgz", server.uri()),
        ];
        let err = resolver.resolve(&repo(urls), "sample").await.unwrap_err();
        assert!(matches!(err, RepoError::Chart(_)));
        assert!(!temp.path().join("sample").exists());
    }

    #[tokio::test]
    async fn test_unchanged_archive_keeps_entry_and_changed_archive_replaces_it() {
        let server = MockServer::start().await;
        serve(&server, "/v1.tgz", 200, chart_archive("0.1.0")).await;
        serve(&server, "/v2.tgz", 200, chart_archive("0.2.0")).await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let v1 = repo(vec![format!("{}/v1.tgz", server.uri())]);

        let path = resolver.resolve(&v1, "sample").await.unwrap();
        std::fs::write(path.join("marker"), "x").unwrap();

        resolver.resolve(&v1, "sample").await.unwrap();
        assert!(path.join("marker").exists());

        let v2 = repo(vec![format!("{}/v2.tgz", server.uri())]);
        resolver.resolve(&v2, "sample").await.unwrap();
        assert!(!path.join("marker").exists());
        assert_eq!(
            resolver.cache().load("sample").unwrap().metadata.version.to_string(),
            "0.2.0"
        );
    }

    #[tokio::test]
    async fn test_damaged_entry_is_refetched() {
        let server = MockServer::start().await;
        serve(&server, "/v1.tgz", 200, chart_archive("0.1.0")).await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let v1 = repo(vec![format!("{}/v1.tgz", server.uri())]);

        let path = resolver.resolve(&v1, "sample").await.unwrap();
        std::fs::remove_file(path.join("Chart.yaml")).unwrap();

        resolver.resolve(&v1, "sample").await.unwrap();
        assert!(path.join("Chart.yaml").exists());
    }

    #[tokio::test]
    async fn test_invalid_chart_name_rejected_before_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let resolver = resolver_in(temp.path());
        let err = resolver
            .resolve(&repo(vec![format!("{}/x.tgz", server.uri())]), "../escape")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Chart(_)));
    }
}
