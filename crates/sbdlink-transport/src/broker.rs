//! Cloudloop message-broker envelopes.
//!
//! Mobile-terminated blocks are published to `lingo/<account>/<thing>/MT` as
//! `{"message": "<base64>"}`. Mobile-originated publications arrive on
//! `lingo/<account>/<thing>/MO` with the same field, sometimes without base64
//! padding, plus an optional `imt` location block.

use std::time::SystemTime;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;
use sbdlink_frame::OriginId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::block::{InboundBlock, Submission};
use crate::error::{Result, TransportError};

/// Standard alphabet, padding optional on decode.
const ENVELOPE_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Topic pair of one Cloudloop thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTopics {
    pub account: String,
    pub thing: String,
}

impl BrokerTopics {
    pub fn new(account: impl Into<String>, thing: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            thing: thing.into(),
        }
    }

    /// Vehicle-bound topic.
    pub fn mt(&self) -> String {
        format!("lingo/{}/{}/MT", self.account, self.thing)
    }

    /// Vehicle-originated topic.
    pub fn mo(&self) -> String {
        format!("lingo/{}/{}/MO", self.account, self.thing)
    }
}

/// A publication handed to, or received from, the broker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPublication {
    pub topic: String,
    /// JSON envelope text.
    pub payload: String,
}

#[derive(Serialize)]
struct OutgoingEnvelope {
    message: String,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    imt: Option<ImtLocation>,
}

/// Modem position reported with an MO publication.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImtLocation {
    #[serde(default)]
    pub location: bool,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
}

/// Decoded MO publication.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub payload: Bytes,
    pub location: Option<ImtLocation>,
}

pub fn encode_envelope(block: &[u8]) -> Result<String> {
    Ok(serde_json::to_string(&OutgoingEnvelope {
        message: ENVELOPE_B64.encode(block),
    })?)
}

/// Decode an MO envelope. `Ok(None)` for an envelope without a message.
pub fn decode_envelope(payload: &[u8]) -> Result<Option<BrokerMessage>> {
    let envelope: IncomingEnvelope = serde_json::from_slice(payload)?;
    let location = envelope.imt.filter(|imt| imt.location);
    let Some(message) = envelope.message.filter(|m| !m.is_empty()) else {
        return Ok(None);
    };
    let payload = ENVELOPE_B64.decode(message.trim())?;
    Ok(Some(BrokerMessage {
        payload: Bytes::from(payload),
        location,
    }))
}

/// Turn an MO publication into an inbound block, logging the modem position.
pub fn inbound_block(origin: &OriginId, publication: &BrokerPublication) -> Result<Option<InboundBlock>> {
    let Some(message) = decode_envelope(publication.payload.as_bytes())? else {
        tracing::debug!(topic = %publication.topic, "empty broker publication");
        return Ok(None);
    };
    if let Some(loc) = &message.location {
        tracing::info!(
            %origin,
            latitude = ?loc.latitude,
            longitude = ?loc.longitude,
            altitude = ?loc.altitude,
            "modem location"
        );
    }
    Ok(Some(InboundBlock {
        origin: origin.clone(),
        sequence_hint: None,
        payload: message.payload,
        received_at: SystemTime::now(),
    }))
}

/// Uplink that hands MT envelopes to an externally managed broker session.
#[derive(Debug, Clone)]
pub struct BrokerUplink {
    topic: String,
    outgoing: mpsc::Sender<BrokerPublication>,
}

impl BrokerUplink {
    pub fn new(topics: &BrokerTopics, outgoing: mpsc::Sender<BrokerPublication>) -> Self {
        Self {
            topic: topics.mt(),
            outgoing,
        }
    }

    pub async fn submit(&self, block: &[u8]) -> Result<Submission> {
        let publication = BrokerPublication {
            topic: self.topic.clone(),
            payload: encode_envelope(block)?,
        };
        self.outgoing
            .send(publication)
            .await
            .map_err(|_| TransportError::Closed("broker"))?;
        Ok(Submission::Accepted { reference: None })
    }
}
