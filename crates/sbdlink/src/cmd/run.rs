use std::sync::Arc;
use std::time::Duration;

use sbdlink_gateway::{Gateway, GatewayStats};
use sbdlink_transport::{
    BrokerBridge, BrokerPublication, BrokerUplink, FeedPoller, LocalEndpoint, LoopbackUplink,
    Rock7Uplink, Uplink, WebhookServer,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cmd::RunArgs;
use crate::config::{FileConfig, Resolved, UplinkPlan};
use crate::exit::{config_error, gateway_error, io_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{log_stats, print_event, OutputFormat};

const BRIDGE_QUEUE: usize = 64;

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let mut resolved = FileConfig::load(&args.config)
        .and_then(|file| file.resolve())
        .map_err(config_error)?;
    if args.dry_run {
        tracing::info!(configured = resolved.uplink.name(), "dry run, using loopback uplink");
        resolved.uplink = UplinkPlan::Loopback;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(resolved, args.events, format))
}

async fn serve(resolved: Resolved, print_events: bool, format: OutputFormat) -> CliResult<i32> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                signal_cancel.cancel();
            }
            Err(err) => tracing::warn!(error = %err, "signal handler unavailable"),
        }
    });

    let endpoint = LocalEndpoint::bind(resolved.endpoint)
        .await
        .map(Arc::new)
        .map_err(|err| transport_error("local endpoint", err))?;

    // The bridge only returns once every sender is gone, so one is held for
    // the whole run even when the uplink is not the broker.
    let (bridge_tx, bridge_rx) = mpsc::channel::<BrokerPublication>(BRIDGE_QUEUE);
    let uplink: Uplink = match &resolved.uplink {
        UplinkPlan::Loopback => LoopbackUplink::new().into(),
        UplinkPlan::Rock7(config) => Rock7Uplink::new(config.clone())
            .map_err(|err| transport_error("rock7 uplink", err))?
            .into(),
        UplinkPlan::Broker => {
            let bridge = resolved.bridge.as_ref().ok_or_else(|| {
                CliError::new(crate::exit::USAGE, "broker uplink needs a [broker] section")
            })?;
            BrokerUplink::new(&bridge.topics, bridge_tx.clone()).into()
        }
    };
    tracing::info!(uplink = uplink.name(), "uplink selected");

    let gateway = Gateway::new(resolved.gateway.clone(), uplink, endpoint);
    let mut sources = JoinSet::new();

    if let Some(config) = resolved.webhook.clone() {
        let server = WebhookServer::bind(config, gateway.ingress())
            .await
            .map_err(|err| transport_error("webhook", err))?;
        let cancel = cancel.clone();
        sources.spawn(async move {
            if let Err(err) = server.run(cancel).await {
                tracing::error!(error = %err, "webhook stopped");
            }
        });
    }

    if let Some(config) = resolved.feed.clone() {
        let poller = FeedPoller::new(config).map_err(|err| transport_error("feed", err))?;
        let ingress = gateway.ingress();
        let cancel = cancel.clone();
        sources.spawn(async move {
            if let Err(err) = poller.run(ingress, cancel).await {
                tracing::error!(error = %err, "feed poller stopped");
            }
        });
    }

    if let Some(config) = resolved.bridge.clone() {
        let bridge = BrokerBridge::bind(config)
            .await
            .map_err(|err| transport_error("broker bridge", err))?;
        let ingress = gateway.ingress();
        let cancel = cancel.clone();
        sources.spawn(async move {
            if let Err(err) = bridge.run(bridge_rx, ingress, cancel).await {
                tracing::error!(error = %err, "broker bridge stopped");
            }
        });
    }

    if print_events {
        let events = gateway.subscribe();
        sources.spawn(print_events_until(events, cancel.clone(), format));
    }

    let stats = gateway.stats();
    if let Some(interval) = resolved.stats_interval {
        sources.spawn(report_stats(stats.clone(), interval, cancel.clone()));
    }

    let result = gateway.run(cancel.clone()).await;
    cancel.cancel();
    while sources.join_next().await.is_some() {}
    drop(bridge_tx);

    log_stats(&stats.snapshot(), "final stats");
    result.map_err(|err| gateway_error("gateway", err))?;
    Ok(SUCCESS)
}

async fn print_events_until(
    mut events: broadcast::Receiver<sbdlink_gateway::GatewayEvent>,
    cancel: CancellationToken,
    format: OutputFormat,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, format),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

async fn report_stats(stats: Arc<GatewayStats>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => log_stats(&stats.snapshot(), "stats"),
        }
    }
}
