use std::fmt;
use std::time::Duration;

use reqwest::header::ACCEPT;

use crate::block::Submission;
use crate::error::{Result, TransportError};

/// Rock7 RockBLOCK mobile-terminated submission endpoint.
pub const ROCK7_MT_URL: &str = "https://rockblock.rock7.com/rockblock/MT";

/// Rock7 account and target modem.
#[derive(Clone)]
pub struct Rock7Config {
    pub endpoint: String,
    /// IMEI of the vehicle's modem.
    pub imei: String,
    pub username: String,
    pub password: String,
    /// Per-request HTTP timeout. Default: 30 s.
    pub request_timeout: Duration,
}

impl Rock7Config {
    pub fn new(
        imei: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: ROCK7_MT_URL.to_string(),
            imei: imei.into(),
            username: username.into(),
            password: password.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for Rock7Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rock7Config")
            .field("endpoint", &self.endpoint)
            .field("imei", &self.imei)
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Text for the documented Rock7 `FAILED,<code>` error codes.
pub fn error_text(code: u16) -> Option<&'static str> {
    Some(match code {
        10 => "invalid login credentials",
        11 => "no RockBLOCK with this IMEI found on your account",
        12 => "RockBLOCK has no line rental",
        13 => "your account has insufficient credit",
        14 => "could not decode hex data",
        15 => "data too long",
        16 => "no data",
        99 => "system error",
        _ => return None,
    })
}

/// Parse the plain-text body of an MT submission.
///
/// `OK,<id>` is accepted; `FAILED,<code>,<text>` is rejected. Only a Rock7
/// system error is worth retrying.
pub fn parse_response(body: &str) -> Submission {
    let mut parts = body.trim().splitn(3, ',');
    match parts.next() {
        Some("OK") => Submission::Accepted {
            reference: parts.next().map(|id| id.trim().to_string()),
        },
        Some("FAILED") => {
            let code = parts.next().and_then(|c| c.trim().parse::<u16>().ok());
            let detail = parts.next().map(str::trim).filter(|d| !d.is_empty());
            let reason = match (code, code.and_then(error_text), detail) {
                (Some(code), Some(text), _) => format!("{text} ({code})"),
                (Some(code), None, Some(detail)) => format!("{detail} ({code})"),
                (Some(code), None, None) => format!("error code {code}"),
                (None, _, _) => format!("unparseable failure: {}", body.trim()),
            };
            Submission::Rejected {
                reason,
                retryable: code == Some(99),
            }
        }
        _ => Submission::Rejected {
            reason: format!("unexpected response: {}", body.trim()),
            retryable: true,
        },
    }
}

/// Submits blocks through the Rock7 HTTP API.
#[derive(Debug, Clone)]
pub struct Rock7Uplink {
    client: reqwest::Client,
    config: Rock7Config,
}

impl Rock7Uplink {
    pub fn new(config: Rock7Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &Rock7Config {
        &self.config
    }

    pub async fn submit(&self, block: &[u8]) -> Result<Submission> {
        let data = hex::encode(block);
        let response = self
            .client
            .post(&self.config.endpoint)
            .header(ACCEPT, "text/plain")
            .form(&[
                ("imei", self.config.imei.as_str()),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
                ("data", data.as_str()),
                ("flush", "yes"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                service: "rock7",
                status,
            });
        }
        let body = response.text().await?;
        let submission = parse_response(&body);
        tracing::debug!(bytes = block.len(), response = %body.trim(), "rock7 submission");
        Ok(submission)
    }
}
