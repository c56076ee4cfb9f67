//! HTTP snapshot source for network cameras.
//!
//! Each call performs one `GET` on the camera's still-image endpoint with a
//! fixed user agent and a per-request timeout. Cameras that require HTTP
//! Digest authentication answer `401`; the challenge is answered and cached so
//! later requests authenticate up front until the camera issues a new nonce.
//!
//! The snapshot source is responsible for:
//! - Bounding each fetch by the configured timeout
//! - Treating any non-200 status or undecodable body as a failed fetch
//! - Decoding the body in memory into a `Frame`
//!
//! The snapshot source MUST NOT:
//! - Retry within a call (the poll loop retries on its next tick)
//! - Buffer frames between calls

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::digest::DigestChallenge;
use super::FrameSource;
use crate::frame::Frame;

const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a camera snapshot endpoint.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1/ISAPI/Streaming/channels/1/picture".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Statistics for a snapshot source.
#[derive(Clone, Debug, Default)]
pub struct SnapshotStats {
    pub frames_fetched: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

pub struct SnapshotSource {
    config: SnapshotConfig,
    agent: ureq::Agent,
    request_uri: String,
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
    stats: SnapshotStats,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera url scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let request_uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self {
            config,
            agent,
            request_uri,
            challenge: None,
            nonce_count: 0,
            stats: SnapshotStats::default(),
        })
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn fetch(&mut self) -> Result<Vec<u8>> {
        let response = match self.send_authorized() {
            Err(ureq::Error::Status(401, response)) => {
                let challenges = response.all("WWW-Authenticate");
                if challenges.is_empty() {
                    return Err(anyhow!("camera returned 401 without a challenge"));
                }
                // Cameras may offer Basic alongside Digest; only Digest is answered.
                let header = challenges
                    .iter()
                    .find(|value| is_digest_challenge(value))
                    .ok_or_else(|| {
                        anyhow!("camera offers no Digest challenge: {}", challenges.join(" | "))
                    })?;
                self.challenge = Some(DigestChallenge::parse(header)?);
                self.nonce_count = 0;
                self.send_authorized()
            }
            other => other,
        };

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("camera returned HTTP {}", code));
            }
            Err(e) => return Err(anyhow!(e).context("fetch camera snapshot")),
        };
        if response.status() != 200 {
            return Err(anyhow!("camera returned HTTP {}", response.status()));
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .context("read camera snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty camera snapshot"));
        }
        Ok(bytes)
    }

    fn send_authorized(&mut self) -> std::result::Result<ureq::Response, ureq::Error> {
        let mut request = self.agent.get(&self.config.url);
        if let Some(challenge) = &self.challenge {
            self.nonce_count += 1;
            let mut cnonce = [0u8; 8];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut cnonce);
            let authorization = challenge.authorization_with_cnonce(
                "GET",
                &self.request_uri,
                &self.config.username,
                &self.config.password,
                &hex::encode(cnonce),
                self.nonce_count,
            );
            request = request.set("Authorization", &authorization);
        }
        request.call()
    }
}

fn is_digest_challenge(header: &str) -> bool {
    header
        .trim_start()
        .split(char::is_whitespace)
        .next()
        .map(|scheme| scheme.eq_ignore_ascii_case("digest"))
        .unwrap_or(false)
}

impl FrameSource for SnapshotSource {
    fn next_frame(&mut self) -> Result<Frame> {
        let result = self.fetch().and_then(|bytes| Frame::decode(&bytes));
        match &result {
            Ok(_) => {
                self.stats.frames_fetched += 1;
                self.stats.last_error = None;
            }
            Err(e) => {
                self.stats.failures += 1;
                self.stats.last_error = Some(format!("{:#}", e));
            }
        }
        result
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}
