use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

const MAX_PHOTO_BYTES: usize = 25 * 1024 * 1024; // 25 MiB
const HTTP_TIMEOUT_SECS: u64 = 15;

/// Where baseline group photos are loaded from before re-upload.
#[async_trait]
pub trait PhotoSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpPhotoSource {
    http: Client,
}

impl HttpPhotoSource {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("threadguard/0.1")
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PhotoSource for HttpPhotoSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = checked_url(url)?;
        let resp = self.http.get(parsed).send().await?.error_for_status()?;
        if let Some(len) = resp.content_length() {
            if len > MAX_PHOTO_BYTES as u64 {
                bail!("photo too large ({len} bytes)");
            }
        }
        let bytes = resp.bytes().await?;
        if bytes.len() > MAX_PHOTO_BYTES {
            bail!("photo too large ({} bytes)", bytes.len());
        }
        ensure_image(&bytes)?;
        Ok(bytes.to_vec())
    }
}

fn checked_url(url: &str) -> Result<Url> {
    let u = Url::parse(url.trim())?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(anyhow!("refusing to fetch photo over {other}")),
    }
}

/// CDN error pages come back as 200 text/html often enough to check.
pub fn ensure_image(bytes: &[u8]) -> Result<image::ImageFormat> {
    if bytes.is_empty() {
        bail!("empty photo body");
    }
    image::guess_format(bytes).map_err(|e| anyhow!("not an image: {e}"))
}
