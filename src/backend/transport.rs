use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use std::path::Path;

use super::error::{Error, Result};

/// Issues a GET for a location and hands back the raw body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, location: &str) -> Result<Bytes>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, location: &str) -> Result<Bytes> {
        // Plain paths and file:// urls are read straight from disk.
        if let Some(path) = local_path(location) {
            debug!("Reading local resource {}", path);
            return Ok(Bytes::from(tokio::fs::read(Path::new(path)).await?));
        }

        debug!("GET {}", location);
        let response = self.client.get(location).send().await?;
        check_status(location, response.status().as_u16())?;
        Ok(response.bytes().await?)
    }
}

fn local_path(location: &str) -> Option<&str> {
    if let Some(path) = location.strip_prefix("file://") {
        return Some(path);
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        return None;
    }
    Some(location)
}

/// Rejects anything that is not a 2xx.
pub fn check_status(url: &str, status: u16) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::Status {
            url: url.to_string(),
            status,
        })
    }
}
