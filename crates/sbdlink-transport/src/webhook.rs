//! Receiver for Rock7 mobile-originated deliveries.
//!
//! Rock7 POSTs each MO message as a form to the configured URL:
//!
//! ```text
//! imei=300234010753370&momsn=12&transmit_time=24-03-05 14:07:31
//! &iridium_latitude=52.1&iridium_longitude=-0.5&iridium_cep=3&data=fd09...
//! ```
//!
//! The reply body is informational only; every request is answered with
//! 200 so Rock7 does not keep retrying deliveries we chose to drop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Form, Router};
use bytes::Bytes;
use sbdlink_frame::OriginId;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::block::{InboundBlock, IngressSender};
use crate::delivery::{is_too_old, parse_transmit_time};
use crate::error::{Result, TransportError};

/// Webhook listener settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub bind: SocketAddr,
    /// Route Rock7 posts to. Default: `/rock`.
    pub path: String,
    /// Only deliveries from this modem are accepted.
    pub imei: String,
    /// Deliveries transmitted longer ago are dropped. Default: 5 min.
    pub max_packet_age: Duration,
}

impl WebhookConfig {
    pub fn new(bind: SocketAddr, imei: impl Into<String>) -> Self {
        Self {
            bind,
            path: "/rock".to_string(),
            imei: imei.into(),
            max_packet_age: Duration::from_secs(5 * 60),
        }
    }
}

/// One Rock7 MO form post.
#[derive(Debug, Clone, Deserialize)]
pub struct MoDelivery {
    pub imei: String,
    #[serde(default)]
    pub momsn: Option<u32>,
    pub transmit_time: String,
    #[serde(default)]
    pub iridium_latitude: Option<f64>,
    #[serde(default)]
    pub iridium_longitude: Option<f64>,
    #[serde(default)]
    pub data: String,
}

/// Why a delivery was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    BadImei,
    OldPacket,
    BadTimestamp,
    BadData,
    /// The form is missing fields or is not a form at all.
    BadRequest,
}

impl Refusal {
    /// Reply body sent back to Rock7.
    pub fn reply(&self) -> &'static str {
        match self {
            Refusal::BadImei => "Bad IMEI",
            Refusal::OldPacket => "Old packet",
            Refusal::BadTimestamp => "Bad transmit time",
            Refusal::BadData => "Bad data",
            Refusal::BadRequest => "Bad request",
        }
    }
}

/// Validate a delivery and turn it into an inbound block.
pub fn accept(
    config: &WebhookConfig,
    delivery: &MoDelivery,
    now: SystemTime,
) -> std::result::Result<InboundBlock, Refusal> {
    if delivery.imei != config.imei {
        return Err(Refusal::BadImei);
    }
    let sent = parse_transmit_time(&delivery.transmit_time).map_err(|_| Refusal::BadTimestamp)?;
    if is_too_old(sent, now, config.max_packet_age) {
        return Err(Refusal::OldPacket);
    }
    let payload = hex::decode(delivery.data.trim()).map_err(|_| Refusal::BadData)?;
    if payload.is_empty() {
        return Err(Refusal::BadData);
    }
    Ok(InboundBlock {
        origin: OriginId::new(&delivery.imei),
        sequence_hint: delivery.momsn,
        payload: Bytes::from(payload),
        received_at: sent,
    })
}

struct WebhookState {
    config: WebhookConfig,
    ingress: IngressSender,
}

async fn receive_mo(
    State(state): State<Arc<WebhookState>>,
    form: std::result::Result<Form<MoDelivery>, FormRejection>,
) -> &'static str {
    let delivery = match form {
        Ok(Form(delivery)) => delivery,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "unreadable MO delivery refused");
            return Refusal::BadRequest.reply();
        }
    };
    match accept(&state.config, &delivery, SystemTime::now()) {
        Ok(block) => {
            tracing::info!(
                imei = %delivery.imei,
                momsn = ?delivery.momsn,
                latitude = ?delivery.iridium_latitude,
                longitude = ?delivery.iridium_longitude,
                bytes = block.payload.len(),
                "MO delivery received"
            );
            if state.ingress.send(block).await.is_err() {
                tracing::warn!("ingress closed, MO delivery dropped");
            }
            "OK"
        }
        Err(refusal) => {
            tracing::warn!(
                imei = %delivery.imei,
                momsn = ?delivery.momsn,
                transmit_time = %delivery.transmit_time,
                reason = refusal.reply(),
                "MO delivery refused"
            );
            refusal.reply()
        }
    }
}

/// HTTP server accepting Rock7 MO posts.
pub struct WebhookServer {
    listener: tokio::net::TcpListener,
    router: Router,
}

impl WebhookServer {
    pub async fn bind(config: WebhookConfig, ingress: IngressSender) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(config.bind)
            .await
            .map_err(|source| TransportError::Bind {
                addr: config.bind,
                source,
            })?;
        let path = config.path.clone();
        let state = Arc::new(WebhookState { config, ingress });
        let router = Router::new()
            .route(&path, post(receive_mo))
            .with_state(state);
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "webhook listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use tokio::sync::mpsc;

    use super::*;

    const IMEI: &str = "300234010753370";

    fn config() -> WebhookConfig {
        WebhookConfig::new(([127, 0, 0, 1], 0).into(), IMEI)
    }

    fn delivery(transmit_time: &str) -> MoDelivery {
        MoDelivery {
            imei: IMEI.into(),
            momsn: Some(44),
            transmit_time: transmit_time.into(),
            iridium_latitude: Some(52.1),
            iridium_longitude: Some(-0.5),
            data: "fd0900".into(),
        }
    }

    fn now() -> SystemTime {
        // 24-03-05 14:10:00 UTC
        UNIX_EPOCH + Duration::from_secs(1_709_647_800)
    }

    #[test]
    fn fresh_delivery_is_accepted() {
        let block = accept(&config(), &delivery("24-03-05 14:07:31"), now()).unwrap();
        assert_eq!(block.origin.as_str(), IMEI);
        assert_eq!(block.sequence_hint, Some(44));
        assert_eq!(block.payload.as_ref(), &[0xFD, 0x09, 0x00]);
    }

    #[test]
    fn foreign_imei_is_refused() {
        let mut other = delivery("24-03-05 14:07:31");
        other.imei = "300234010000000".into();
        assert_eq!(accept(&config(), &other, now()), Err(Refusal::BadImei));
    }

    #[test]
    fn old_delivery_is_refused() {
        assert_eq!(
            accept(&config(), &delivery("24-03-05 14:04:00"), now()),
            Err(Refusal::OldPacket)
        );
    }

    #[test]
    fn bad_data_is_refused() {
        let mut bad = delivery("24-03-05 14:07:31");
        bad.data = "xyz".into();
        assert_eq!(accept(&config(), &bad, now()), Err(Refusal::BadData));
    }

    #[tokio::test]
    async fn server_forwards_posted_form() {
        let (tx, mut rx) = mpsc::channel(4);
        let server = WebhookServer::bind(config(), tx).await.unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(server.run(cancel.clone()));

        let transmit_time = chrono::Utc::now().format("%y-%m-%d %H:%M:%S").to_string();
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/rock");
        let reply = client
            .post(&url)
            .form(&[
                ("imei", IMEI),
                ("momsn", "7"),
                ("transmit_time", transmit_time.as_str()),
                ("iridium_latitude", "52.1"),
                ("iridium_longitude", "-0.5"),
                ("data", "fe0102"),
            ])
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(reply, "OK");

        let block = rx.recv().await.unwrap();
        assert_eq!(block.sequence_hint, Some(7));
        assert_eq!(block.payload.as_ref(), &[0xFE, 0x01, 0x02]);

        let reply = client
            .post(&url)
            .form(&[
                ("imei", "1"),
                ("transmit_time", transmit_time.as_str()),
                ("data", "fe"),
            ])
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(reply, "Bad IMEI");

        let response = client
            .post(&url)
            .form(&[("imei", IMEI), ("data", "fe")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "Bad request");
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
