use bytes::Bytes;
use image::DynamicImage;
use log::{debug, warn};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::Result;
use super::fetch::FetchCoordinator;

/// One page position in the reader. Height follows the image's aspect ratio
/// once it has loaded.
#[derive(Debug, Clone)]
pub struct PageSlot {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub image: Option<DynamicImage>,
}

pub type SlotHandle = Arc<Mutex<PageSlot>>;

impl PageSlot {
    pub fn new(url: impl Into<String>, width: u32) -> SlotHandle {
        Arc::new(Mutex::new(PageSlot {
            url: url.into(),
            width,
            height: 0,
            image: None,
        }))
    }

    fn show(&mut self, image: DynamicImage) {
        let ratio = image.width() as f32 / image.height().max(1) as f32;
        self.height = ((self.width as f32 / ratio).round() as u32).max(1);
        self.image = Some(image);
    }
}

pub fn decode_image(bytes: &Bytes) -> Result<DynamicImage> {
    let image = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

/// Fills a single [`PageSlot`] from the fetch coordinator.
///
/// The loader only holds a weak reference to its slot: if the reader throws
/// the slot away while the download is running, the result is dropped.
pub struct PageLoader {
    slot: Weak<Mutex<PageSlot>>,
    url: String,
    fetcher: FetchCoordinator,
    token: Option<CancellationToken>,
    completed: Arc<watch::Sender<bool>>,
}

impl PageLoader {
    pub fn new(slot: &SlotHandle, fetcher: FetchCoordinator, token: Option<CancellationToken>) -> Self {
        let url = slot.lock().url.clone();
        let (completed, _) = watch::channel(false);

        Self {
            slot: Arc::downgrade(slot),
            url,
            fetcher,
            token,
            completed: Arc::new(completed),
        }
    }

    pub async fn load(&self) {
        self.completed.send_replace(false);

        let slot = self.slot.clone();
        let completed = self.completed.clone();
        let url = self.url.clone();

        self.fetcher
            .fetch(&self.url, self.token.clone(), move |bytes| {
                let Some(slot) = slot.upgrade() else {
                    debug!("Slot for {} is gone, dropping image", url);
                    return;
                };

                match decode_image(&bytes) {
                    Ok(image) => {
                        slot.lock().show(image);
                        completed.send_replace(true);
                    }
                    Err(e) => warn!("Failed to decode {}: {}", url, e),
                }
            })
            .await;
    }

    pub fn is_completed(&self) -> bool {
        *self.completed.borrow()
    }

    /// Resolves once the slot has been filled. Never resolves for a load whose
    /// download or decode failed.
    pub async fn completed(&self) {
        let mut rx = self.completed.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cache::PageCache;
    use crate::backend::testing::{FakeTransport, eventually, png};
    use std::time::Duration;
    use tokio::time::timeout;

    const URL: &str = "https://s2.mangadex.org/data/abc/x1.png";

    fn fetcher(transport: Arc<FakeTransport>) -> (FetchCoordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FetchCoordinator::new(PageCache::new(dir.path()), transport), dir)
    }

    #[tokio::test]
    async fn load_fills_slot_and_keeps_aspect_ratio() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(URL, png(4, 2));
        let (fetcher, _dir) = fetcher(transport);
        let slot = PageSlot::new(URL, 800);
        let loader = PageLoader::new(&slot, fetcher, None);

        loader.load().await;
        timeout(Duration::from_secs(2), loader.completed()).await.unwrap();

        assert!(loader.is_completed());
        let slot = slot.lock();
        assert_eq!(slot.height, 400);
        assert_eq!(slot.image.as_ref().map(|i| i.width()), Some(4));
    }

    #[tokio::test]
    async fn dropped_slot_is_skipped() {
        let transport = Arc::new(FakeTransport::gated());
        transport.respond(URL, png(4, 2));
        let (fetcher, _dir) = fetcher(transport.clone());
        let slot = PageSlot::new(URL, 800);
        let loader = PageLoader::new(&slot, fetcher.clone(), None);

        loader.load().await;
        drop(slot);
        transport.release(1);

        eventually(|| fetcher.in_flight_count() == 0).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!loader.is_completed());
    }

    #[tokio::test]
    async fn failed_fetch_never_completes() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail(URL, 404);
        let (fetcher, _dir) = fetcher(transport);
        let slot = PageSlot::new(URL, 800);
        let loader = PageLoader::new(&slot, fetcher, None);

        loader.load().await;

        assert!(timeout(Duration::from_millis(100), loader.completed()).await.is_err());
        assert!(slot.lock().image.is_none());
    }

    #[tokio::test]
    async fn undecodable_bytes_never_complete() {
        let transport = Arc::new(FakeTransport::new());
        transport.respond(URL, &b"not an image"[..]);
        let (fetcher, _dir) = fetcher(transport);
        let slot = PageSlot::new(URL, 800);
        let loader = PageLoader::new(&slot, fetcher, None);

        loader.load().await;

        assert!(timeout(Duration::from_millis(100), loader.completed()).await.is_err());
    }
}
