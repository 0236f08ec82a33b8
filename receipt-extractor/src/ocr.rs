//! OCR engine boundary

use crate::config::ExtractorConfig;
use crate::error::{ExtractionError, Result};
use crate::metrics::OCR_DURATION;
use crate::source::LoadedImage;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Text recognition engine
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name (for logs and metrics)
    fn name(&self) -> &str;

    /// Raw text of the image
    async fn recognize(&self, image: &LoadedImage) -> Result<String>;
}

/// Runs the `tesseract` CLI, piping the image through stdin/stdout
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    language: String,
    timeout: Duration,
}

impl TesseractEngine {
    /// Build from config
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.ocr_language.clone(),
            timeout: Duration::from_millis(config.ocr_timeout_ms),
        }
    }

    async fn run(&self, image: &LoadedImage) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", self.language.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionError::OcrEngine(format!("cannot start {}: {}", self.binary, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractionError::OcrEngine("stdin not captured".to_string()))?;
        let bytes = image.bytes.clone();
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&bytes).await;
            drop(stdin);
            result
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExtractionError::OcrEngine(format!("tesseract failed: {}", e)))?;

        if let Ok(Err(e)) = writer.await {
            debug!("tesseract closed stdin early: {}", e);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::OcrEngine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &LoadedImage) -> Result<String> {
        let timer = OCR_DURATION.with_label_values(&["tesseract"]).start_timer();
        let result = tokio::time::timeout(self.timeout, self.run(image)).await;
        timer.observe_duration();

        match result {
            Ok(text) => text,
            Err(_) => {
                warn!("tesseract timed out after {:?}", self.timeout);
                Err(ExtractionError::OcrEngine(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Returns canned text; for tests and demos
#[derive(Debug)]
pub struct StaticOcrEngine {
    text: Option<String>,
    delay: Duration,
    calls: AtomicU64,
}

impl StaticOcrEngine {
    /// Engine that always "reads" `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Engine that always fails
    pub fn failing() -> Self {
        Self {
            text: None,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Simulated processing time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of recognize calls
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for StaticOcrEngine {
    fn name(&self) -> &str {
        "static"
    }

    async fn recognize(&self, _image: &LoadedImage) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.text
            .clone()
            .ok_or_else(|| ExtractionError::OcrEngine("engine unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageFormat;

    fn image() -> LoadedImage {
        LoadedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            format: ImageFormat::Jpeg,
        }
    }

    #[tokio::test]
    async fn test_static_engine() {
        let engine = StaticOcrEngine::new("CAFE ROMA\nTOTAL 12.50");
        assert_eq!(engine.recognize(&image()).await.unwrap(), "CAFE ROMA\nTOTAL 12.50");
        assert_eq!(engine.calls(), 1);

        let failing = StaticOcrEngine::failing();
        assert!(matches!(
            failing.recognize(&image()).await,
            Err(ExtractionError::OcrEngine(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_engine_delay() {
        let engine = StaticOcrEngine::new("late").with_delay(Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        assert_eq!(engine.recognize(&image()).await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_tesseract_binary() {
        let engine = TesseractEngine::new(&ExtractorConfig {
            tesseract_path: "/nonexistent/tesseract-binary".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            engine.recognize(&image()).await,
            Err(ExtractionError::OcrEngine(_))
        ));
    }
}
