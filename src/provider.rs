//! Sources of delegation files.
//!
//! A [`Provider`] hands out the raw bytes of one registry's delegation file.
//! [`HttpProvider`] downloads it every time; [`CachedProvider`] wraps any
//! provider and keeps a copy on disk that is only refreshed when it is old
//! and its published checksum no longer matches.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{Config, ProviderConfig};
use crate::reader::{ReadError, ReadOptions, Reader, wait_for_cancel};
use crate::record::RecordSet;
use crate::stats::ParseStats;

/// Errors obtaining or reading a provider's data.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: HTTP status {status}")]
    Status {
        provider: String,
        status: reqwest::StatusCode,
    },

    #[error("{provider}: cache error on {path:?}: {source}")]
    Io {
        provider: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{provider}: {source}")]
    Read {
        provider: String,
        #[source]
        source: ReadError,
    },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("provider task failed: {0}")]
    Task(String),
}

/// A source of one registry's raw delegation file.
pub trait Provider: Send + Sync {
    /// Short registry name, e.g. `ripencc`.
    fn name(&self) -> &str;

    /// Obtain the complete file.
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, ProviderError>> + Send;

    /// Whether a locally held copy is out of date.
    fn is_stale(&self) -> impl Future<Output = Result<bool, ProviderError>> + Send;

    /// Checksum published for the current upstream file, if any.
    fn checksum(&self) -> impl Future<Output = Result<Option<String>, ProviderError>> + Send;
}

/// Downloads a delegation file over HTTP on every fetch.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }

    fn http_error(&self, source: reqwest::Error) -> ProviderError {
        ProviderError::Http {
            provider: self.name.clone(),
            source,
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| self.http_error(e))
    }
}

impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
        info!("Fetching {} data from {}", self.name, self.url);
        let response = self.get(&self.url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: self.name.clone(),
                status,
            });
        }
        let body = response.bytes().await.map_err(|e| self.http_error(e))?;
        debug!("Fetched {} bytes for {}", body.len(), self.name);
        Ok(body.to_vec())
    }

    /// There is no local copy, so it is always stale.
    async fn is_stale(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn checksum(&self) -> Result<Option<String>, ProviderError> {
        let response = self.get(&format!("{}.md5", self.url)).await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Cannot get md5 for {}: HTTP status {}", self.name, status);
            return Ok(None);
        }
        let text = response.text().await.map_err(|e| self.http_error(e))?;
        let checksum = parse_md5_listing(&text);
        if checksum.is_none() {
            warn!("No md5 found in checksum listing for {}", self.name);
        }
        Ok(checksum)
    }
}

/// Extract the digest from a listing such as
/// `MD5 (delegated-apnic-extended-latest) = 0123456789abcdef0123456789abcdef`.
pub fn parse_md5_listing(text: &str) -> Option<String> {
    let (_, digest) = text.trim_end().rsplit_once('=')?;
    let digest = digest.trim();
    if digest.len() == 32 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(digest.to_ascii_lowercase())
    } else {
        None
    }
}

/// Hex-encoded MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Keeps an on-disk copy of another provider's file.
///
/// The copy lives at `<cache_dir>/<name>/latest`. A non-empty copy younger
/// than `max_age` is used as is. Otherwise the inner provider is asked for
/// the file when the copy is empty or its MD5 differs from the published one.
#[derive(Debug, Clone)]
pub struct CachedProvider<P> {
    inner: P,
    cache_dir: PathBuf,
    max_age: Duration,
}

impl<P: Provider> CachedProvider<P> {
    pub fn new(inner: P, cache_dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.into(),
            max_age,
        }
    }

    /// Path of the cached copy.
    pub fn file_path(&self) -> PathBuf {
        self.cache_dir.join(self.inner.name()).join("latest")
    }

    fn io_error(&self, path: PathBuf, source: std::io::Error) -> ProviderError {
        ProviderError::Io {
            provider: self.inner.name().to_string(),
            path,
            source,
        }
    }

    async fn read_cache(&self) -> Result<Vec<u8>, ProviderError> {
        let path = self.file_path();
        tokio::fs::read(&path)
            .await
            .map_err(|e| self.io_error(path, e))
    }

    async fn write_cache(&self, data: &[u8]) -> Result<(), ProviderError> {
        let path = self.file_path();
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(dir.to_path_buf(), e))?;
        }
        // `latest` is replaced by rename and is never seen half-written.
        let partial = path.with_extension("tmp");
        debug!("Writing {} bytes to {}", data.len(), partial.display());
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| self.io_error(partial.clone(), e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| self.io_error(path, e))
    }

    /// Size and modification time of the cached copy, if there is one.
    async fn cache_state(&self) -> Option<(u64, SystemTime)> {
        let meta = tokio::fs::metadata(self.file_path()).await.ok()?;
        let modified = meta.modified().ok()?;
        Some((meta.len(), modified))
    }
}

impl<P: Provider> Provider for CachedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
        let state = self.cache_state().await;

        let refresh = match state {
            Some((len, modified)) if len > 0 => {
                let age = modified.elapsed().unwrap_or_default();
                if age < self.max_age {
                    debug!(
                        "No refresh for {}, cached at {}",
                        self.name(),
                        DateTime::<Utc>::from(modified).format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    false
                } else {
                    self.is_stale().await?
                }
            }
            _ => true,
        };

        if refresh {
            info!("{} data needs refresh", self.name());
            let data = self.inner.fetch().await?;
            self.write_cache(&data).await?;
            Ok(data)
        } else {
            self.read_cache().await
        }
    }

    /// Compare the cached copy's MD5 with the published one. A missing copy
    /// or a missing published checksum both count as stale.
    async fn is_stale(&self) -> Result<bool, ProviderError> {
        info!("Checking freshness for {}", self.name());
        let local = match self.read_cache().await {
            Ok(data) if !data.is_empty() => md5_hex(&data),
            _ => return Ok(true),
        };
        let remote = self.inner.checksum().await?;
        debug!("md5 for {}: local {} remote {:?}", self.name(), local, remote);
        Ok(remote.is_none_or(|remote| remote != local))
    }

    async fn checksum(&self) -> Result<Option<String>, ProviderError> {
        self.inner.checksum().await
    }
}

/// Reads a delegation file already on disk.
#[derive(Debug, Clone)]
pub struct FileProvider {
    name: String,
    path: PathBuf,
}

impl FileProvider {
    /// Named after the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| ProviderError::Io {
                provider: self.name.clone(),
                path: self.path.clone(),
                source,
            })
    }

    async fn is_stale(&self) -> Result<bool, ProviderError> {
        Ok(false)
    }

    async fn checksum(&self) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Build the cached HTTP providers named in `config`.
pub fn providers_from_config(
    config: &Config,
) -> anyhow::Result<Vec<CachedProvider<HttpProvider>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let cache_dir = config.cache_dir()?;
    let max_age = Duration::from_secs(config.max_age_secs);

    Ok(config
        .providers
        .iter()
        .map(|ProviderConfig { name, url }| {
            CachedProvider::new(
                HttpProvider::new(name.clone(), url.clone(), client.clone()),
                &cache_dir,
                max_age,
            )
        })
        .collect())
}

/// Fetch and read every provider's file concurrently.
///
/// One task per provider. Results come back in provider order. The first
/// error, or `cancel` turning true, aborts all outstanding tasks.
pub async fn load_all<P: Provider + 'static>(
    providers: Vec<P>,
    options: ReadOptions,
    stats: Arc<ParseStats>,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<(String, RecordSet)>, ProviderError> {
    let count = providers.len();
    let mut tasks = JoinSet::new();

    for (index, provider) in providers.into_iter().enumerate() {
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let name = provider.name().to_string();
            let data = provider.fetch().await?;
            let records = Reader::new(data, options)
                .with_stats(stats)
                .read_until(cancel)
                .await
                .map_err(|source| match source {
                    ReadError::Cancelled => ProviderError::Cancelled,
                    source => ProviderError::Read {
                        provider: name.clone(),
                        source,
                    },
                })?;
            info!(
                "Read {} ({} IP records, {} ASN records)",
                name,
                records.ips.len(),
                records.asns.len()
            );
            Ok::<_, ProviderError>((index, name, records))
        });
    }

    let collect = async {
        let mut loaded = Vec::with_capacity(count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(entry)) => loaded.push(entry),
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ProviderError::Task(e.to_string())),
            }
        }
        Ok(loaded)
    };

    let result = tokio::select! {
        result = collect => result,
        _ = wait_for_cancel(&mut cancel) => Err(ProviderError::Cancelled),
    };

    tasks.abort_all();

    let mut loaded = result?;
    loaded.sort_by_key(|(index, _, _)| *index);
    Ok(loaded
        .into_iter()
        .map(|(_, name, records)| (name, records))
        .collect())
}
