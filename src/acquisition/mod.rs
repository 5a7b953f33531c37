//! Image acquisition and lux estimation
//!
//! The [`ImageAcquirer`] downloads a snapshot over HTTP, decodes it, applies
//! the optional crop and converts the pixels into a lux reading.

pub mod crop;
pub mod luminance;

pub use crop::{CropRegion, PixelRect, DEFAULT_CROP_SIZE};
pub use luminance::{compute_lux, Lux, LUX_SCALE};

use crate::config::ImageConfig;
use crate::error::{DetectorError, Result};
use crate::error_recovery::{RetryExecutor, RetryPolicy, RetryStats};
use image::DynamicImage;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Fetches snapshots and turns them into lux readings
#[derive(Debug, Clone)]
pub struct ImageAcquirer {
    url: String,
    crop: Option<CropRegion>,
    client: reqwest::Client,
    retry: RetryExecutor,
}

impl ImageAcquirer {
    /// Create an acquirer with a pooled HTTP client
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            crop: config.crop,
            client,
            retry: RetryExecutor::new(config.retry.clone()),
        })
    }

    /// Replace the download retry schedule
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn crop(&self) -> Option<CropRegion> {
        self.crop
    }

    /// Download, decode and measure one snapshot
    pub async fn process(&self, cancel: &CancellationToken) -> Result<Lux> {
        let url = validate_image_url(&self.url)?;
        let started = Instant::now();

        let image = self
            .retry
            .execute(cancel, |attempt| self.fetch_image(&url, attempt))
            .await?;

        let lux = self.measure(&image)?;
        info!(
            lux,
            width = image.width(),
            height = image.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Measured ambient light"
        );
        Ok(lux)
    }

    /// Apply the configured crop and compute lux for an already decoded image
    pub fn measure(&self, image: &DynamicImage) -> Result<Lux> {
        match self.crop {
            Some(crop) => {
                let rect = crop.resolve(image.width(), image.height())?;
                debug!(?rect, "Cropping snapshot");
                let region = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
                compute_lux(&region)
            }
            None => compute_lux(image),
        }
    }

    /// Download statistics accumulated since creation
    pub async fn retry_stats(&self) -> RetryStats {
        self.retry.get_stats().await
    }

    async fn fetch_image(&self, url: &Url, attempt: u32) -> Result<DynamicImage> {
        debug!(attempt, url = %url, "Downloading snapshot");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::HttpStatus(status));
        }

        let bytes = response.bytes().await?;
        debug!(attempt, bytes = bytes.len(), "Decoding snapshot");

        Ok(image::load_from_memory(&bytes)?)
    }
}

/// Check that the image source is an absolute http(s) URL
pub fn validate_image_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| DetectorError::config(format!("invalid image URL '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(DetectorError::config(format!(
            "unsupported image URL scheme '{scheme}'"
        ))),
    }
}
