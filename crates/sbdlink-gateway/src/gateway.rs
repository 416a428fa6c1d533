use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sbdlink_filter::CommandFilter;
use sbdlink_frame::{FrameEncoder, WireMode};
use sbdlink_proto::ProtocolVersionAdapter;
use sbdlink_transport::{InboundBlock, IngressSender, LocalEndpoint, Uplink};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::events::{EventBus, GatewayEvent, GatewayStats};
use crate::inbound::InboundPipeline;
use crate::outbound::OutboundPipeline;
use crate::queue::{OutboundQueue, QueueDrain};

/// Outbound sequences start from the clock so a restarted gateway does not
/// reuse sequences the vehicle has already retired.
fn initial_sequence() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Both directions of the link, ready to run.
///
/// Channel sources (webhook, feed, broker bridge) are started by the caller
/// and feed blocks through [`Gateway::ingress`].
pub struct Gateway {
    config: GatewayConfig,
    uplink: Uplink,
    endpoint: Arc<LocalEndpoint>,
    events: EventBus,
    ingress_tx: IngressSender,
    ingress_rx: mpsc::Receiver<InboundBlock>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, uplink: Uplink, endpoint: Arc<LocalEndpoint>) -> Self {
        let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_capacity.max(1));
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            uplink,
            endpoint,
            events,
            ingress_tx,
            ingress_rx,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Sender for channel sources.
    pub fn ingress(&self) -> IngressSender {
        self.ingress_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> Arc<GatewayStats> {
        self.events.stats().clone()
    }

    /// Run until `cancel` fires or a pipeline fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let Gateway {
            config,
            uplink,
            endpoint,
            events,
            ingress_tx,
            ingress_rx,
        } = self;

        let inbound = InboundPipeline::new(
            config.frame.wire_mode,
            config.tracker,
            config.reassembly.clone(),
            ProtocolVersionAdapter::new(config.local_version, config.channel_version),
            events.clone(),
        );
        let mut queue = OutboundQueue::new(config.queue);
        if config.frame.wire_mode == WireMode::Raw {
            queue = queue.packing_whole_packets(config.frame.max_block_size);
        }
        let queue = Arc::new(queue);
        let sequence = initial_sequence();
        let outbound = OutboundPipeline::new(
            CommandFilter::new(config.allow_list.clone()),
            ProtocolVersionAdapter::new(config.local_version, config.channel_version),
            FrameEncoder::with_initial_sequence(config.frame.clone(), sequence),
            queue.clone(),
            events.clone(),
        );
        let drain = QueueDrain::new(queue, uplink, events);

        tracing::info!(
            endpoint = %endpoint.spec(),
            mode = ?config.frame.wire_mode,
            block_size = config.frame.max_block_size,
            local = ?config.local_version,
            channel = ?config.channel_version,
            first_sequence = sequence,
            "gateway starting"
        );

        let tasks_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        tasks.spawn(inbound.run(
            ingress_rx,
            endpoint.clone(),
            config.sweep_interval,
            tasks_cancel.clone(),
        ));
        tasks.spawn(outbound.run(endpoint, tasks_cancel.clone()));
        let drain_cancel = tasks_cancel.clone();
        tasks.spawn(async move {
            drain.run(drain_cancel).await;
            Ok(())
        });

        let mut result = Ok(());
        if let Some(first) = tasks.join_next().await {
            result = flatten(first);
            if let Err(err) = &result {
                tracing::error!(error = %err, "pipeline stopped");
            }
        }
        tasks_cancel.cancel();
        while let Some(rest) = tasks.join_next().await {
            if let Err(err) = flatten(rest) {
                tracing::warn!(error = %err, "pipeline error during shutdown");
            }
        }
        // Held until here so the ingress queue stays open without sources.
        drop(ingress_tx);

        tracing::info!("gateway stopped");
        result
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|err| GatewayError::Task(err.to_string()))?
}
