use bytes::Bytes;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::cache::PageCache;
use super::transport::Transport;

type Callback = Box<dyn FnOnce(Bytes) + Send + 'static>;

struct Waiter {
    token: Option<CancellationToken>,
    callback: Callback,
}

impl Waiter {
    fn deliver(self, bytes: Bytes) {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return;
        }
        (self.callback)(bytes);
    }
}

/// Resolves resource bytes from the page cache or the network, collapsing
/// concurrent requests for the same location into a single download.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<FetchInner>,
}

struct FetchInner {
    cache: PageCache,
    transport: Arc<dyn Transport>,
    in_flight: Mutex<HashMap<String, Vec<Waiter>>>,
}

impl FetchCoordinator {
    pub fn new(cache: PageCache, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(FetchInner {
                cache,
                transport,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Hands the bytes for `url` to `on_result`, from cache or from a single
    /// shared download. `on_result` is skipped if `token` has been cancelled
    /// by the time the bytes arrive.
    ///
    /// Returns once the request is either answered from cache or queued on a
    /// download. A failed download drops its callbacks without calling them.
    pub async fn fetch<F>(&self, url: &str, token: Option<CancellationToken>, on_result: F)
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        if url.trim().is_empty() {
            debug!("Ignoring fetch for blank url");
            return;
        }

        let waiter = Waiter {
            token,
            callback: Box::new(on_result),
        };

        let Some(waiter) = self.join_in_flight(url, waiter) else {
            return;
        };

        let key = PageCache::key_for(url);
        if let Some(bytes) = self.inner.cache.read(&key).await {
            debug!("Cache hit for {}", url);
            waiter.deliver(bytes);
            return;
        }

        // Another caller may have started the download while we were on disk.
        if !self.start_in_flight(url, waiter) {
            return;
        }

        let this = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            this.download(url, key).await;
        });
    }

    fn join_in_flight(&self, url: &str, waiter: Waiter) -> Option<Waiter> {
        let mut in_flight = self.inner.in_flight.lock();
        match in_flight.get_mut(url) {
            Some(waiters) => {
                waiters.push(waiter);
                None
            }
            None => Some(waiter),
        }
    }

    fn start_in_flight(&self, url: &str, waiter: Waiter) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        match in_flight.get_mut(url) {
            Some(waiters) => {
                waiters.push(waiter);
                false
            }
            None => {
                in_flight.insert(url.to_string(), vec![waiter]);
                true
            }
        }
    }

    async fn download(self, url: String, key: String) {
        let result = self.inner.transport.get(&url).await;
        let waiters = self.inner.in_flight.lock().remove(&url).unwrap_or_default();

        match result {
            Ok(bytes) => {
                debug!("Fetched {} ({} bytes, {} waiters)", url, bytes.len(), waiters.len());
                for waiter in waiters {
                    waiter.deliver(bytes.clone());
                }
                if let Err(e) = self.inner.cache.write(&key, bytes).await {
                    warn!("Failed to cache {}: {}", url, e);
                }
            }
            Err(e) => {
                error!("Error getting image {}: {}", url, e);
            }
        }
    }
}

#[cfg(test)]
impl FetchCoordinator {
    pub fn cache(&self) -> &PageCache {
        &self.inner.cache
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// `None` when the download failed, the token went stale, or the url was blank.
    pub async fn get(&self, url: &str, token: Option<CancellationToken>) -> Option<Bytes> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.fetch(url, token, move |bytes| {
            let _ = tx.send(bytes);
        })
        .await;
        rx.await.ok()
    }
}
