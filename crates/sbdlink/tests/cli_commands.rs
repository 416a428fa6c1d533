#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sbdlink::frame::{FrameConfig, FrameEncoder};
use sbdlink::proto::{
    decode_exact, CommandLong, Heartbeat, MessageBody, MessageHeader, ProtocolMessage,
    ProtocolVersion,
};

const IMEI: &str = "300234010753370";

fn sbdlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sbdlink"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("sbdlink should run")
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("sbdlink.toml");
    std::fs::write(&path, body).expect("config should be writable");
    path.to_string_lossy().into_owned()
}

fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port should be available")
}

fn message(body: MessageBody) -> ProtocolMessage {
    ProtocolMessage::new(
        ProtocolVersion::V2,
        MessageHeader {
            sequence: 1,
            system_id: 1,
            component_id: 1,
        },
        body,
    )
}

#[test]
fn version_prints_package_version() {
    let output = sbdlink(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("sbdlink {}", env!("CARGO_PKG_VERSION"))
    );

    let extended = sbdlink(&["version", "--extended"]);
    assert!(extended.status.success());
    let stdout = String::from_utf8_lossy(&extended.stdout);
    assert!(stdout.contains("modems: 9603=270 bytes, 9704=1024 bytes"));
}

#[test]
fn check_prints_effective_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        dir.path(),
        "[channel]\nmodem = \"9704\"\n\n[local]\nendpoint = \"udpout:127.0.0.1:14550\"\n",
    );

    let output = sbdlink(&["--format", "json", "check", "--config", &config]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"setting\":\"channel.max_block_size\",\"value\":\"1024\""));
    assert!(stdout.contains("udpout:127.0.0.1:14550"));
}

#[test]
fn check_rejects_invalid_and_missing_configs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(dir.path(), "[channel]\nmax_block_size = 4\n");
    let output = sbdlink(&["check", "--config", &config]);
    assert_eq!(output.status.code(), Some(60));

    let missing = dir.path().join("absent.toml");
    let output = sbdlink(&["check", "--config", &missing.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot read"));
}

#[test]
fn inspect_decodes_framed_blocks() {
    let mut encoder = FrameEncoder::with_initial_sequence(FrameConfig::default(), 500);
    let encoded = encoder
        .encode(&message(MessageBody::CommandLong(CommandLong {
            command: 400,
            target_system: 1,
            target_component: 1,
            ..CommandLong::default()
        })))
        .expect("command should encode");
    let block = hex::encode(&encoded.blocks[0]);

    let output = sbdlink(&["--format", "json", "inspect", &block]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"name\":\"COMMAND_LONG\""));
    assert!(stdout.contains("\"sequence\":500"));

    let output = sbdlink(&["--format", "json", "inspect", "not-hex"]);
    assert_eq!(output.status.code(), Some(60));
}

fn post_form(port: u16, path: &str, body: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "POST {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

#[test]
fn run_forwards_webhook_blocks_to_the_gcs() {
    let gcs = UdpSocket::bind("127.0.0.1:0").expect("gcs socket");
    gcs.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    let gcs_addr = gcs.local_addr().expect("gcs addr");
    let port = free_tcp_port();

    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_config(
        dir.path(),
        &format!(
            "[local]\nendpoint = \"udpout:{gcs_addr}\"\n\n[inbound.webhook]\nbind = \"127.0.0.1:{port}\"\nimei = \"{IMEI}\"\n"
        ),
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_sbdlink"))
        .args(["--log-level", "error", "run", "--dry-run", "--config", &config])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("run should start");

    let heartbeat = message(MessageBody::Heartbeat(Heartbeat {
        vehicle_type: 1,
        autopilot: 3,
        system_status: 4,
        mavlink_version: 3,
        ..Heartbeat::default()
    }));
    let mut encoder = FrameEncoder::with_initial_sequence(FrameConfig::default(), 42);
    let encoded = encoder.encode(&heartbeat).expect("heartbeat should encode");
    let transmit_time = chrono::Utc::now()
        .format("%y-%m-%d %H:%M:%S")
        .to_string()
        .replace(' ', "%20")
        .replace(':', "%3A");
    let form = format!(
        "imei={IMEI}&momsn=7&transmit_time={transmit_time}&iridium_latitude=52.1&iridium_longitude=-0.5&iridium_cep=3&data={}",
        hex::encode(&encoded.blocks[0])
    );

    let start = Instant::now();
    let response = loop {
        match post_form(port, "/rock", &form) {
            Ok(response) => break response,
            Err(_) if start.elapsed() < Duration::from_secs(5) => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                panic!("webhook never came up: {err}");
            }
        }
    };
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    let mut buf = [0u8; 512];
    let received = gcs.recv_from(&mut buf);
    let _ = child.kill();
    let _ = child.wait();

    let (len, _) = received.expect("GCS should receive the heartbeat");
    let decoded = decode_exact(&buf[..len], ProtocolVersion::V2).expect("valid MAVLink");
    assert_eq!(decoded.body, heartbeat.body);
}
