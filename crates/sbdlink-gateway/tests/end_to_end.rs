//! Both directions through a running gateway over real UDP sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use sbdlink_frame::{decode_frame, FrameConfig, FrameEncoder, OriginId};
use sbdlink_gateway::{Gateway, GatewayConfig, GatewayEvent};
use sbdlink_proto::{
    decode_exact, encode, CommandLong, HighLatency2, MessageBody, MessageHeader, ProtocolMessage,
    ProtocolVersion,
};
use sbdlink_transport::{EndpointMode, EndpointSpec, InboundBlock, LocalEndpoint, LoopbackUplink};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn telemetry() -> ProtocolMessage {
    ProtocolMessage::new(
        ProtocolVersion::V2,
        MessageHeader {
            sequence: 17,
            system_id: 1,
            component_id: 1,
        },
        MessageBody::HighLatency2(HighLatency2 {
            timestamp: 86_400,
            latitude: -353_632_610,
            longitude: 1_491_652_300,
            custom_mode: 4,
            altitude: 584,
            heading: 45,
            groundspeed: 12,
            battery: 91,
            custom2: 1,
            ..HighLatency2::default()
        }),
    )
}

fn command(command: u16) -> ProtocolMessage {
    ProtocolMessage::new(
        ProtocolVersion::V2,
        MessageHeader {
            sequence: 2,
            system_id: 255,
            component_id: 190,
        },
        MessageBody::CommandLong(CommandLong {
            command,
            target_system: 1,
            target_component: 1,
            params: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            ..CommandLong::default()
        }),
    )
}

fn block(payload: Bytes) -> InboundBlock {
    InboundBlock {
        origin: OriginId::new("300234010753370"),
        sequence_hint: None,
        payload,
        received_at: SystemTime::now(),
    }
}

struct Harness {
    gcs: UdpSocket,
    gateway_addr: SocketAddr,
    ingress: sbdlink_transport::IngressSender,
    uplinked: mpsc::UnboundedReceiver<Bytes>,
    events: tokio::sync::broadcast::Receiver<GatewayEvent>,
    stats: Arc<sbdlink_gateway::GatewayStats>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<sbdlink_gateway::Result<()>>,
}

async fn start(block_size: usize) -> Harness {
    let gcs = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let endpoint = LocalEndpoint::bind(EndpointSpec {
        mode: EndpointMode::UdpOut,
        addr: gcs.local_addr().unwrap(),
    })
    .await
    .unwrap();
    let gateway_addr = SocketAddr::from(([127, 0, 0, 1], endpoint.local_addr().unwrap().port()));

    let (sink, uplinked) = mpsc::unbounded_channel();
    let config = GatewayConfig {
        frame: FrameConfig {
            max_block_size: block_size,
            ..FrameConfig::default()
        },
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config, LoopbackUplink::with_sink(sink).into(), Arc::new(endpoint));
    let ingress = gateway.ingress();
    let events = gateway.subscribe();
    let stats = gateway.stats();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(gateway.run(cancel.clone()));

    Harness {
        gcs,
        gateway_addr,
        ingress,
        uplinked,
        events,
        stats,
        cancel,
        task,
    }
}

impl Harness {
    async fn recv_gcs(&self) -> Bytes {
        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(WAIT, self.gcs.recv_from(&mut buf))
            .await
            .expect("no datagram for the GCS")
            .unwrap();
        Bytes::copy_from_slice(&buf[..len])
    }

    async fn next_event(&mut self, want: impl Fn(&GatewayEvent) -> bool) -> GatewayEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.unwrap();
                if want(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not observed")
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn fragmented_telemetry_reaches_gcs_once() {
    let mut h = start(25).await;
    let msg = telemetry();
    let blocks = FrameEncoder::with_initial_sequence(
        FrameConfig {
            max_block_size: 25,
            ..FrameConfig::default()
        },
        9_000,
    )
    .encode(&msg)
    .unwrap()
    .blocks;
    assert_eq!(blocks.len(), 3);

    for index in [2, 0, 1] {
        h.ingress.send(block(blocks[index].clone())).await.unwrap();
    }
    let datagram = h.recv_gcs().await;
    assert_eq!(decode_exact(&datagram, ProtocolVersion::V2).unwrap(), msg);
    h.next_event(|e| matches!(e, GatewayEvent::MessageDelivered { sequence: 9_000, .. }))
        .await;

    // The channel delivers the whole message again.
    for b in &blocks {
        h.ingress.send(block(b.clone())).await.unwrap();
    }
    for _ in 0..3 {
        h.next_event(|e| matches!(e, GatewayEvent::DuplicateFrame { .. }))
            .await;
    }
    assert_eq!(h.stats.snapshot().delivered, 1);
    h.stop().await;
}

#[tokio::test]
async fn disallowed_command_is_dropped_before_framing() {
    let mut h = start(270).await;

    h.gcs
        .send_to(&encode(&command(246)), h.gateway_addr)
        .await
        .unwrap();
    let event = h
        .next_event(|e| matches!(e, GatewayEvent::Filtered { .. }))
        .await;
    assert_eq!(
        event,
        GatewayEvent::Filtered {
            msg_id: 76,
            reason: "command 246 is not allowed toward the vehicle".into(),
        }
    );
    assert!(h.uplinked.try_recv().is_err());

    h.gcs
        .send_to(&encode(&command(400)), h.gateway_addr)
        .await
        .unwrap();
    let sent = tokio::time::timeout(WAIT, h.uplinked.recv())
        .await
        .expect("nothing submitted")
        .unwrap();
    let frame = decode_frame(OriginId::new("vehicle"), &sent).unwrap();
    assert!(frame.is_whole());
    let decoded = decode_exact(&frame.payload, frame.version).unwrap();
    assert_eq!(decoded, command(400));

    h.next_event(|e| matches!(e, GatewayEvent::FrameSubmitted { .. }))
        .await;
    assert_eq!(h.stats.snapshot().filtered, 1);
    h.stop().await;
}
