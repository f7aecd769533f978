//! Scripted transport shared by the backend tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::error::Result;
use super::positions::PositionStore;
use super::transport::{Transport, check_status};

#[derive(Clone)]
enum Reply {
    Body(Bytes),
    Status(u16),
}

#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request blocks until [`FakeTransport::release`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn respond(&self, location: &str, body: impl Into<Bytes>) {
        self.replies
            .lock()
            .insert(location.to_string(), Reply::Body(body.into()));
    }

    pub fn fail(&self, location: &str, status: u16) {
        self.replies
            .lock()
            .insert(location.to_string(), Reply::Status(status));
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn count(&self, location: &str) -> usize {
        self.requests.lock().iter().filter(|r| *r == location).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, location: &str) -> Result<Bytes> {
        self.requests.lock().push(location.to_string());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let reply = self.replies.lock().get(location).cloned();
        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Status(status)) => {
                check_status(location, status)?;
                Ok(Bytes::new())
            }
            None => {
                check_status(location, 404)?;
                Ok(Bytes::new())
            }
        }
    }
}

pub fn png(width: u32, height: u32) -> Bytes {
    let mut buf = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

/// Polls `check` until it holds, failing the test after a couple of seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<String, i64>>,
}

impl PositionStore for MemoryPositionStore {
    fn get(&self, key: &str) -> Option<i64> {
        self.positions.lock().get(key).copied()
    }

    fn set(&self, key: &str, value: i64) {
        self.positions.lock().insert(key.to_string(), value);
    }
}
