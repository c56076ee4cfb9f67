//! Upload of event photos to the remote collector.
//!
//! One `multipart/form-data` POST per event, no retry, no queue. The response
//! is logged and returned for inspection but never drives control flow.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_FIELD_NAME: &str = "image";
pub const BODY_PREVIEW_CHARS: usize = 200;

const MAX_RESPONSE_BYTES: u64 = 64 * 1024;

/// What the collector answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub status: u16,
    /// First `BODY_PREVIEW_CHARS` characters of the response body.
    pub body_preview: String,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivers one image file to the collector.
///
/// `Err` covers failures to read the file or reach the collector; any HTTP
/// response, including error statuses, is an `UploadOutcome`.
pub trait Uploader {
    fn send(&mut self, path: &Path) -> Result<UploadOutcome>;
}

impl<U: Uploader + ?Sized> Uploader for Box<U> {
    fn send(&mut self, path: &Path) -> Result<UploadOutcome> {
        (**self).send(path)
    }
}

/// Collector endpoint settings.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub url: String,
    pub field_name: String,
    /// Overall request timeout; `None` waits as long as the server does.
    pub timeout: Option<Duration>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/upload".to_string(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            timeout: None,
        }
    }
}

pub struct HttpUploader {
    config: CollectorConfig,
    agent: ureq::Agent,
}

impl HttpUploader {
    pub fn new(config: CollectorConfig) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            config,
            agent: builder.build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl Uploader for HttpUploader {
    fn send(&mut self, path: &Path) -> Result<UploadOutcome> {
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image.jpg");
        let boundary = new_boundary();
        let body = multipart_body(&boundary, &self.config.field_name, file_name, &bytes);

        let response = match self
            .agent
            .post(&self.config.url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(anyhow!(e).context("post to collector")),
        };

        let status = response.status();
        let mut raw = Vec::new();
        if let Err(e) = response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut raw)
        {
            log::debug!("collector response body unreadable: {}", e);
        }
        let outcome = UploadOutcome {
            status,
            body_preview: preview(&String::from_utf8_lossy(&raw)),
        };
        log::info!(
            "upload {} -> {}: {}",
            file_name,
            outcome.status,
            outcome.body_preview
        );
        Ok(outcome)
    }
}

fn new_boundary() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("----marker-watch-{}", hex::encode(bytes))
}

/// Single-file `multipart/form-data` body.
pub fn multipart_body(boundary: &str, field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("Content-Type: {}\r\n\r\n", content_type(file_name)).as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

fn content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_layout() {
        let body = multipart_body("XyZ", "image", "entree_upload_5.jpg", b"\xff\xd8data");
        let expected_head = "--XyZ\r\n\
            Content-Disposition: form-data; name=\"image\"; filename=\"entree_upload_5.jpg\"\r\n\
            Content-Type: image/jpeg\r\n\r\n";
        assert!(body.starts_with(expected_head.as_bytes()));
        assert!(body.ends_with(b"\xff\xd8data\r\n--XyZ--\r\n"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let short = preview(&long);
        assert_eq!(short.chars().count(), BODY_PREVIEW_CHARS);
        assert_eq!(preview("ok"), "ok");
    }

    #[test]
    fn outcome_success_range() {
        let ok = UploadOutcome {
            status: 201,
            body_preview: String::new(),
        };
        let err = UploadOutcome {
            status: 502,
            body_preview: String::new(),
        };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut uploader = HttpUploader::new(CollectorConfig::default());
        assert!(uploader
            .send(Path::new("/nonexistent/marker-watch/upload.jpg"))
            .is_err());
    }
}
