//! Polled-feed receiver.
//!
//! Rock7 can forward MO deliveries to an Adafruit IO feed. The poller fetches
//! the feed's last value on a timer; the value is the delivery as a JSON
//! record:
//!
//! ```text
//! {"value": "{\"transmit_time\":\"24-03-05 14:07:31\",\"momsn\":12,\"data\":\"fd09...\"}"}
//! ```

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use reqwest::StatusCode;
use sbdlink_frame::OriginId;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::block::{InboundBlock, IngressSender};
use crate::delivery::{is_too_old, parse_transmit_time, restore_trimmed_v2_header};
use crate::error::{Result, TransportError};

/// Feed poller settings.
#[derive(Clone)]
pub struct FeedConfig {
    /// URL returning the feed's last value, e.g.
    /// `https://io.adafruit.com/api/v2/<user>/feeds/<feed>/data/last`.
    pub url: String,
    /// Sent as `X-AIO-Key` when set.
    pub api_key: Option<String>,
    /// Modem the feed carries deliveries from.
    pub origin: OriginId,
    /// Default: 10 s.
    pub poll_interval: Duration,
    /// Records transmitted longer ago are skipped. Default: 10 min.
    pub max_packet_age: Duration,
    /// Vehicle strips the MAVLink2 start marker and incompat flags.
    pub restore_trimmed_header: bool,
    /// Per-request HTTP timeout. Default: 15 s.
    pub request_timeout: Duration,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>, origin: OriginId) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            origin,
            poll_interval: Duration::from_secs(10),
            max_packet_age: Duration::from_secs(10 * 60),
            restore_trimmed_header: false,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("url", &self.url)
            .field(
                "api_key",
                &self
                    .api_key
                    .as_ref()
                    .map(|k| format!("<redacted:{} bytes>", k.len())),
            )
            .field("origin", &self.origin)
            .field("poll_interval", &self.poll_interval)
            .field("max_packet_age", &self.max_packet_age)
            .field("restore_trimmed_header", &self.restore_trimmed_header)
            .finish()
    }
}

/// One delivery as stored in the feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedRecord {
    pub transmit_time: String,
    #[serde(default)]
    pub momsn: Option<u32>,
    pub data: String,
    #[serde(default)]
    pub iridium_latitude: Option<f64>,
    #[serde(default)]
    pub iridium_longitude: Option<f64>,
}

#[derive(Deserialize)]
struct FeedValue {
    value: String,
}

/// Parse the feed's last-value document.
pub fn parse_feed_value(body: &str) -> Result<FeedRecord> {
    let outer: FeedValue = serde_json::from_str(body)?;
    Ok(serde_json::from_str(&outer.value)?)
}

/// Polls a feed and forwards new records.
pub struct FeedPoller {
    client: reqwest::Client,
    config: FeedConfig,
    last: Option<FeedRecord>,
}

impl FeedPoller {
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            last: None,
        })
    }

    /// Decide whether `record` is new and fresh; remember it if so.
    pub fn consider(&mut self, record: FeedRecord, now: SystemTime) -> Result<Option<InboundBlock>> {
        if self.last.as_ref() == Some(&record) {
            return Ok(None);
        }
        let sent = parse_transmit_time(&record.transmit_time)?;
        if is_too_old(sent, now, self.config.max_packet_age) {
            tracing::debug!(
                transmit_time = %record.transmit_time,
                "feed record too old"
            );
            self.last = Some(record);
            return Ok(None);
        }

        let raw = hex::decode(record.data.trim())?;
        let payload = if self.config.restore_trimmed_header {
            restore_trimmed_v2_header(&raw)
        } else {
            Bytes::from(raw)
        };
        tracing::info!(
            origin = %self.config.origin,
            momsn = ?record.momsn,
            latitude = ?record.iridium_latitude,
            longitude = ?record.iridium_longitude,
            bytes = payload.len(),
            "feed record received"
        );
        let block = InboundBlock {
            origin: self.config.origin.clone(),
            sequence_hint: record.momsn,
            payload,
            received_at: sent,
        };
        self.last = Some(record);
        Ok(Some(block))
    }

    /// Fetch the feed once. `Ok(None)` when the feed is empty or unchanged.
    pub async fn poll_once(&mut self) -> Result<Option<InboundBlock>> {
        let mut request = self.client.get(&self.config.url);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-AIO-Key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                service: "feed",
                status,
            });
        }
        let body = response.text().await?;
        let record = parse_feed_value(&body)?;
        self.consider(record, SystemTime::now())
    }

    /// Poll until `cancel` fires. Poll failures are logged and retried on the
    /// next tick.
    pub async fn run(mut self, ingress: IngressSender, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(url = %self.config.url, "feed poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            match self.poll_once().await {
                Ok(Some(block)) => {
                    if ingress.send(block).await.is_err() {
                        return Err(TransportError::Closed("ingress"));
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(error = %err, "feed poll failed"),
            }
        }
    }
}
