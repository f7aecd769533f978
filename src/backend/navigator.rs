use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cache::PageCache;
use super::config::Config;
use super::fetch::FetchCoordinator;
use super::loader::{PageLoader, PageSlot, SlotHandle};
use super::mangadex::{Catalog, CatalogEntry, MangadexApi, parse_title_id};
use super::positions::PositionStore;
use super::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavState {
    #[default]
    Idle,
    CatalogLoading,
    CatalogReady,
    ChapterLoading,
    ChapterReady,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigatorEvent {
    CatalogLoaded {
        title: String,
        names: Vec<String>,
        selected: usize,
    },
    CatalogFailed {
        title_id: u64,
        error: String,
    },
    ChapterStarted {
        index: usize,
        name: String,
    },
    PageLoaded {
        page: usize,
        total: usize,
    },
    ChapterReady {
        index: usize,
    },
}

struct Task {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Task {
    fn cancel(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct NavShared {
    state: NavState,
    source_url: Option<String>,
    catalog: Option<Arc<Catalog>>,
    selected: usize,
    slots: Vec<SlotHandle>,
    catalog_task: Option<Task>,
    traversal: Option<Task>,
}

/// Owns the chapter list of the current manga and walks the selected
/// chapter's pages one at a time.
///
/// Every navigation cancels the running catalog load and page walk. Page
/// downloads already handed to the [`FetchCoordinator`] still finish and land
/// in the cache, but their results no longer reach any slot.
#[derive(Clone)]
pub struct ChapterNavigator {
    inner: Arc<NavInner>,
}

struct NavInner {
    config: Arc<Config>,
    api: MangadexApi,
    fetcher: FetchCoordinator,
    positions: Arc<dyn PositionStore>,
    events: mpsc::UnboundedSender<NavigatorEvent>,
    shared: Mutex<NavShared>,
}

impl ChapterNavigator {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        positions: Arc<dyn PositionStore>,
        events: mpsc::UnboundedSender<NavigatorEvent>,
    ) -> Self {
        let cache = PageCache::new(&config.cache_dir);
        let fetcher = FetchCoordinator::new(cache, transport.clone());
        let api = MangadexApi::new(transport, config.clone());

        Self {
            inner: Arc::new(NavInner {
                config,
                api,
                fetcher,
                positions,
                events,
                shared: Mutex::new(NavShared::default()),
            }),
        }
    }

    pub fn state(&self) -> NavState {
        self.inner.shared.lock().state
    }

    pub fn selected(&self) -> usize {
        self.inner.shared.lock().selected
    }

    /// Page slots of the chapter being shown, in reading order.
    pub fn slots(&self) -> Vec<SlotHandle> {
        self.inner.shared.lock().slots.clone()
    }

    /// Starts loading the manga behind `source_url`. Returns `false` and
    /// leaves everything untouched if the url is not a catalog url.
    pub fn select_catalog(&self, source_url: &str) -> bool {
        let Some(title_id) = parse_title_id(source_url, &self.inner.config.catalog_host) else {
            warn!("Ignoring catalog url {:?}", source_url);
            return false;
        };

        let mut shared = self.inner.shared.lock();
        if let Some(task) = shared.catalog_task.take() {
            task.cancel();
        }
        if let Some(task) = shared.traversal.take() {
            task.cancel();
        }
        shared.catalog = None;
        shared.selected = 0;
        shared.slots.clear();
        shared.source_url = Some(source_url.trim().to_string());
        shared.state = NavState::CatalogLoading;

        let token = CancellationToken::new();
        let this = self.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            this.load_catalog(title_id, task_token).await;
        });
        shared.catalog_task = Some(Task { token, handle });

        true
    }

    /// Moves the selection by `delta` chapters and loads the result.
    pub fn advance(&self, delta: i64) {
        let mut shared = self.inner.shared.lock();
        let Some(catalog) = shared.catalog.clone() else {
            error!("No manga loaded");
            return;
        };

        let index = catalog.clamp(shared.selected as i64 + delta);
        self.select_locked(&mut shared, &catalog, index);
    }

    /// Jumps to chapter `index` and loads it.
    pub fn select_index(&self, index: i64) {
        let mut shared = self.inner.shared.lock();
        let Some(catalog) = shared.catalog.clone() else {
            error!("No manga loaded");
            return;
        };

        let index = catalog.clamp(index);
        self.select_locked(&mut shared, &catalog, index);
    }

    /// (Re)loads the selected chapter, or the whole catalog if none is loaded.
    pub fn load_selected(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.catalog.is_some() {
            self.start_traversal(&mut shared);
            return;
        }

        let source = shared.source_url.clone();
        drop(shared);

        error!("No manga loaded, trying to load");
        if let Some(source) = source {
            self.select_catalog(&source);
        }
    }

    fn emit(&self, event: NavigatorEvent) {
        let _ = self.inner.events.send(event);
    }

    fn select_locked(&self, shared: &mut NavShared, catalog: &Catalog, index: usize) {
        shared.selected = index;
        self.inner.positions.set(&catalog.title, index as i64);
        self.start_traversal(shared);
    }

    async fn load_catalog(self, title_id: u64, token: CancellationToken) {
        info!("Loading manga {}", title_id);

        let catalog = match self.inner.api.get_catalog(title_id).await {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Error while trying to get manga {}: {}", title_id, e);
                if !token.is_cancelled() {
                    self.emit(NavigatorEvent::CatalogFailed {
                        title_id,
                        error: e.to_string(),
                    });
                }
                return;
            }
        };

        let mut shared = self.inner.shared.lock();
        if token.is_cancelled() {
            return;
        }
        if catalog.is_empty() {
            warn!(
                "{} has no chapters in language {:?}",
                catalog.title, self.inner.config.language
            );
        }

        let saved = self.inner.positions.get(&catalog.title).unwrap_or(0);
        let selected = catalog.clamp(saved);
        self.inner.positions.set(&catalog.title, selected as i64);

        self.emit(NavigatorEvent::CatalogLoaded {
            title: catalog.title.clone(),
            names: catalog.names(),
            selected,
        });

        shared.selected = selected;
        shared.catalog = Some(Arc::new(catalog));
        shared.state = NavState::CatalogReady;
        shared.catalog_task = None;

        self.start_traversal(&mut shared);
    }

    fn start_traversal(&self, shared: &mut NavShared) {
        if let Some(task) = shared.traversal.take() {
            task.cancel();
        }
        shared.slots.clear();

        let Some(catalog) = shared.catalog.clone() else {
            return;
        };
        let index = shared.selected;
        let Some(entry) = catalog.get(index).cloned() else {
            warn!("Chapter {} not found in {}", index, catalog.title);
            return;
        };

        shared.state = NavState::ChapterLoading;
        self.emit(NavigatorEvent::ChapterStarted {
            index,
            name: entry.name.clone(),
        });

        let token = CancellationToken::new();
        let this = self.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            this.traverse(index, entry, task_token).await;
        });
        shared.traversal = Some(Task { token, handle });
    }

    async fn traverse(self, index: usize, entry: CatalogEntry, token: CancellationToken) {
        info!("Loading chapter {} ({})", entry.name, entry.id);

        let document = match self.inner.api.get_chapter(&entry.id).await {
            Ok(document) => document,
            Err(e) => {
                error!("Error while trying to get chapter {}: {}", entry.id, e);
                return;
            }
        };

        let urls = document.page_urls(&self.inner.config);
        let total = urls.len();
        let page_timeout = self.inner.config.page_timeout();

        for (page, url) in urls.into_iter().enumerate() {
            let slot = PageSlot::new(url, self.inner.config.slot_width);
            {
                let mut shared = self.inner.shared.lock();
                if token.is_cancelled() || shared.selected != index {
                    debug!("Abandoning chapter {} at page {}", entry.name, page);
                    return;
                }
                shared.slots.push(slot.clone());
            }

            let loader = PageLoader::new(&slot, self.inner.fetcher.clone(), Some(token.clone()));
            drop(slot);
            loader.load().await;

            // Cache hits fill the slot before `load` returns.
            if !loader.is_completed() {
                match page_timeout {
                    Some(limit) => {
                        if tokio::time::timeout(limit, loader.completed()).await.is_err() {
                            warn!("Page {} of {} timed out, skipping", page + 1, entry.name);
                            continue;
                        }
                    }
                    None => loader.completed().await,
                }
            }

            let shared = self.inner.shared.lock();
            if token.is_cancelled() {
                return;
            }
            self.emit(NavigatorEvent::PageLoaded { page, total });
            drop(shared);
        }

        let mut shared = self.inner.shared.lock();
        if token.is_cancelled() {
            return;
        }
        shared.state = NavState::ChapterReady;
        self.emit(NavigatorEvent::ChapterReady { index });
    }
}
