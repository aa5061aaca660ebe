//! Periodic refresh of process-wide security data.
//!
//! A [`PeriodicRefresher`] polls one URL on a fixed interval. The payload is a
//! JSON object with a `data` array of strings; when the raw text differs from
//! the last published one it is parsed by a [`SnapshotParser`] and published
//! as a new immutable snapshot on a `watch` channel. Failures are logged and
//! the loop carries on at the next interval.

pub mod fetch;
pub mod parsers;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RefreshConfig;
use crate::error::RefreshError;

pub use fetch::{ContentFetcher, HttpFetcher};
pub use parsers::{
    ContentHashParser, MemHash, MemHashConfigs, MemHashParser, SecurityKeyParser,
};

/// Turns the `data` entries of a payload into a snapshot.
pub trait SnapshotParser: Send + Sync + 'static {
    type Snapshot: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn parse(&self, entries: Vec<String>) -> Result<Self::Snapshot, RefreshError>;
}

#[derive(Debug, Deserialize)]
struct Payload {
    data: Vec<String>,
}

pub struct PeriodicRefresher<P: SnapshotParser> {
    url: String,
    interval: Duration,
    fetcher: Arc<dyn ContentFetcher>,
    parser: P,
    last_raw: Option<String>,
    publisher: watch::Sender<Arc<P::Snapshot>>,
}

impl<P: SnapshotParser> PeriodicRefresher<P> {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        fetcher: Arc<dyn ContentFetcher>,
        parser: P,
        initial: P::Snapshot,
    ) -> (Self, watch::Receiver<Arc<P::Snapshot>>) {
        let (publisher, receiver) = watch::channel(Arc::new(initial));
        let refresher = Self {
            url: url.into(),
            interval,
            fetcher,
            parser,
            last_raw: None,
            publisher,
        };
        (refresher, receiver)
    }

    /// Fetch once and publish if the payload changed. Returns whether a new
    /// snapshot was published.
    pub async fn refresh_once(&mut self) -> Result<bool, RefreshError> {
        let raw = self.fetcher.fetch_text(&self.url).await?;
        if self.last_raw.as_deref() == Some(raw.as_str()) {
            return Ok(false);
        }

        let payload: Payload = serde_json::from_str(&raw)?;
        let snapshot = self.parser.parse(payload.data)?;
        self.publisher.send_replace(Arc::new(snapshot));
        self.last_raw = Some(raw);
        Ok(true)
    }

    async fn refresh_logged(&mut self) {
        let source = self.parser.name();
        match self.refresh_once().await {
            Ok(true) => tracing::info!(source, url = %self.url, "Published new snapshot"),
            Ok(false) => tracing::debug!(source, "Snapshot unchanged"),
            Err(e) => tracing::warn!(source, url = %self.url, error = %e, "Refresh failed"),
        }
    }

    /// Refresh every `interval` until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(source = self.parser.name(), "Refresher stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => self.refresh_logged().await,
            }
        }
    }

    /// Run one refresh inline, then keep refreshing on a background task.
    pub async fn start(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.refresh_logged().await;
        tokio::spawn(self.run(shutdown))
    }
}

/// Latest published security data, readable from any request handler.
#[derive(Debug, Clone)]
pub struct SecuritySnapshots {
    security_versions: watch::Receiver<Arc<Vec<String>>>,
    content_hashes: watch::Receiver<Arc<BTreeSet<String>>>,
    mem_hashes: watch::Receiver<Arc<MemHashConfigs>>,
}

impl SecuritySnapshots {
    /// Snapshots that never change, for when refreshing is disabled.
    pub fn empty() -> Self {
        Self {
            security_versions: watch::channel(Arc::new(Vec::new())).1,
            content_hashes: watch::channel(Arc::new(BTreeSet::new())).1,
            mem_hashes: watch::channel(Arc::new(MemHashConfigs::new())).1,
        }
    }

    pub fn security_versions(&self) -> Arc<Vec<String>> {
        self.security_versions.borrow().clone()
    }

    pub fn content_hashes(&self) -> Arc<BTreeSet<String>> {
        self.content_hashes.borrow().clone()
    }

    pub fn mem_hashes(&self) -> Arc<MemHashConfigs> {
        self.mem_hashes.borrow().clone()
    }

    pub fn is_security_version_allowed(&self, version: &str) -> bool {
        self.security_versions.borrow().iter().any(|v| v == version)
    }

    pub fn is_content_hash_allowed(&self, hash: &str) -> bool {
        self.content_hashes.borrow().contains(hash)
    }
}

/// Start the security-key, content-hash and mem-hash refreshers.
///
/// Each source is fetched once before this returns so the snapshots are
/// populated before the server accepts requests.
pub async fn start_security_refreshers(
    config: &RefreshConfig,
    fetcher: Arc<dyn ContentFetcher>,
    shutdown: CancellationToken,
) -> SecuritySnapshots {
    let mut snapshots = SecuritySnapshots::empty();
    let interval = config.interval();

    let security_keys = config.security_keys_url().map(|url| {
        let parser = SecurityKeyParser::new(config.security_salt.clone());
        let (refresher, rx) =
            PeriodicRefresher::new(url, interval, fetcher.clone(), parser, Vec::new());
        snapshots.security_versions = rx;
        refresher
    });

    let content_hashes = config.content_hashes_url().map(|url| {
        let (refresher, rx) = PeriodicRefresher::new(
            url,
            interval,
            fetcher.clone(),
            ContentHashParser,
            BTreeSet::new(),
        );
        snapshots.content_hashes = rx;
        refresher
    });

    let mem_hashes = config.mem_hashes_url().map(|url| {
        let (refresher, rx) =
            PeriodicRefresher::new(url, interval, fetcher.clone(), MemHashParser, MemHashConfigs::new());
        snapshots.mem_hashes = rx;
        refresher
    });

    // Initial fetches run concurrently
    tokio::join!(
        start_if_configured(security_keys, shutdown.clone()),
        start_if_configured(content_hashes, shutdown.clone()),
        start_if_configured(mem_hashes, shutdown),
    );

    snapshots
}

async fn start_if_configured<P: SnapshotParser>(
    refresher: Option<PeriodicRefresher<P>>,
    shutdown: CancellationToken,
) {
    if let Some(refresher) = refresher {
        refresher.start(shutdown).await;
    }
}
