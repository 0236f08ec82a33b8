//! Receipt image sources

use crate::config::ExtractorConfig;
use crate::error::{ExtractionError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Where the receipt image lives
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Local file
    Path {
        /// File path
        path: PathBuf,
    },
    /// Remote object
    Url {
        /// HTTP(S) URL
        url: String,
    },
    /// Bytes already in memory (e.g. a multipart upload)
    Blob {
        /// Raw bytes
        #[serde(skip)]
        bytes: Vec<u8>,
        /// Original file name, if any
        name: Option<String>,
    },
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path { path } => write!(f, "Path({})", path.display()),
            ImageSource::Url { url } => write!(f, "Url({})", url),
            ImageSource::Blob { bytes, name } => {
                write!(f, "Blob({} bytes, {:?})", bytes.len(), name)
            }
        }
    }
}

impl ImageSource {
    /// Local file source
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path { path: path.into() }
    }

    /// URL source
    pub fn url(url: impl Into<String>) -> Self {
        ImageSource::Url { url: url.into() }
    }

    /// In-memory source
    pub fn blob(bytes: Vec<u8>) -> Self {
        ImageSource::Blob { bytes, name: None }
    }

    /// Stable reference recorded on the receipt
    pub fn reference(&self) -> String {
        match self {
            ImageSource::Path { path } => format!("file://{}", path.display()),
            ImageSource::Url { url } => url.clone(),
            ImageSource::Blob { bytes, .. } => {
                let digest = Sha256::digest(bytes);
                let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
                format!("blob:sha256:{}", hex)
            }
        }
    }

    /// Load and sniff the image
    pub async fn load(&self, client: &Client, config: &ExtractorConfig) -> Result<LoadedImage> {
        let bytes = match self {
            ImageSource::Path { path } => tokio::fs::read(path).await.map_err(|e| {
                ExtractionError::ImageLoad(format!("cannot read {}: {}", path.display(), e))
            })?,
            ImageSource::Url { url } => fetch(client, url, config.fetch_timeout_ms).await?,
            ImageSource::Blob { bytes, .. } => bytes.clone(),
        };

        if bytes.is_empty() {
            return Err(ExtractionError::ImageLoad(format!("{:?} is empty", self)));
        }
        if bytes.len() > config.max_image_bytes {
            return Err(ExtractionError::ImageLoad(format!(
                "{:?} is {} bytes, limit {}",
                self,
                bytes.len(),
                config.max_image_bytes
            )));
        }

        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            ExtractionError::ImageLoad(format!("{:?} is not a supported image", self))
        })?;
        debug!("Loaded {:?}: {} bytes of {:?}", self, bytes.len(), format);

        Ok(LoadedImage { bytes, format })
    }
}

async fn fetch(client: &Client, url: &str, timeout_ms: u64) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| ExtractionError::ImageLoad(format!("cannot fetch {}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(ExtractionError::ImageLoad(format!(
            "fetching {} returned {}",
            url,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractionError::ImageLoad(format!("cannot read body of {}: {}", url, e)))?;
    Ok(bytes.to_vec())
}

/// Recognized image container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG
    Png,
    /// JPEG
    Jpeg,
    /// GIF
    Gif,
    /// BMP
    Bmp,
    /// TIFF
    Tiff,
    /// WebP
    Webp,
    /// PDF (scanned receipts)
    Pdf,
}

impl ImageFormat {
    /// Detect the format from magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
            [b'B', b'M', ..] => Some(ImageFormat::Bmp),
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::Webp)
            }
            [b'%', b'P', b'D', b'F', b'-', ..] => Some(ImageFormat::Pdf),
            _ => None,
        }
    }
}

/// Image bytes ready for OCR
#[derive(Clone, PartialEq, Eq)]
pub struct LoadedImage {
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// Detected format
    pub format: ImageFormat,
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .finish()
    }
}
