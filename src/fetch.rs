use anyhow::Context;
use bytes::{Bytes, BytesMut};
use image::error::{LimitError, LimitErrorKind};
use image::{ImageError, ImageReader, RgbaImage};
use mime::Mime;
use reqwest::StatusCode;
use serde_json::Value;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use tokio::task;
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    max_decoded_pixels: u64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {url}")]
    InvalidUrl { url: String },
    #[error("fetch failed from {url}: {status}")]
    UpstreamStatus { status: StatusCode, url: String },
    #[error("fetch failed from {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
    #[error("image from {url} could not be decoded")]
    Decode {
        url: String,
        #[source]
        source: ImageError,
    },
    #[error("response from {url} is not valid json")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("decode worker failed")]
    Worker(#[from] task::JoinError),
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize, max_decoded_pixels: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("outfit-renderer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build reqwest client")?;
        Ok(Self {
            client,
            max_bytes,
            max_decoded_pixels,
        })
    }

    /// Fetches `url` and decodes it to RGBA. Sources without alpha come back
    /// fully opaque.
    pub async fn fetch_image(&self, url: &str) -> Result<RgbaImage, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let max_pixels = self.max_decoded_pixels;
        let image = task::spawn_blocking(move || decode_raster(&bytes, max_pixels))
            .await?
            .map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })?;
        debug!(
            url = %url,
            width = image.width(),
            height = image.height(),
            "decoded image"
        );
        Ok(image)
    }

    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        serde_json::from_slice(&bytes).map_err(|source| FetchError::InvalidJson {
            url: url.to_string(),
            source,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Bytes, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
            });
        }
        let transport = |source: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let mut response = self.client.get(parsed).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(FetchError::UpstreamStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok())
            .map(|mime| mime.essence_str().to_string());
        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(too_large());
            }
        }
        let mut buffer = BytesMut::with_capacity(std::cmp::min(self.max_bytes, 64 * 1024));
        let mut total = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            total = total.saturating_add(chunk.len());
            if total > self.max_bytes {
                return Err(too_large());
            }
            buffer.extend_from_slice(&chunk);
        }
        debug!(
            url = %url,
            size = total,
            content_type = content_type.as_deref().unwrap_or("unknown"),
            "fetched remote body"
        );
        Ok(buffer.freeze())
    }
}

pub fn decode_raster(bytes: &[u8], max_pixels: u64) -> Result<RgbaImage, ImageError> {
    let (width, height) = raster_dimensions(bytes, max_pixels)?;
    if width == 0 || height == 0 {
        return Err(dimension_error());
    }
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    reader.limits(raster_limits(max_pixels));
    let image = reader.decode()?;
    let pixels = (image.width() as u64).saturating_mul(image.height() as u64);
    if pixels > max_pixels {
        return Err(dimension_error());
    }
    Ok(image.to_rgba8())
}

/// Reads the declared size from the image header without decoding pixels.
fn raster_dimensions(bytes: &[u8], max_pixels: u64) -> Result<(u32, u32), ImageError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    reader.limits(raster_limits(max_pixels));
    let (width, height) = reader.into_dimensions()?;
    let pixels = (width as u64).saturating_mul(height as u64);
    if pixels > max_pixels {
        return Err(dimension_error());
    }
    Ok((width, height))
}

fn dimension_error() -> ImageError {
    ImageError::Limits(LimitError::from_kind(LimitErrorKind::DimensionError))
}

fn raster_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u32::MAX as u64) as u32;
    let max_alloc = max_pixels.saturating_mul(4);
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_alloc);
    limits
}
