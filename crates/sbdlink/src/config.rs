//! Gateway configuration file.
//!
//! Every section and field is optional; an empty file runs a dry-run gateway
//! on `udpin:0.0.0.0:14550` with the 9603 block size.
//!
//! ```toml
//! [channel]
//! modem = "9603"
//! wire_mode = "framed"
//!
//! [local]
//! endpoint = "udpin:0.0.0.0:14550"
//!
//! [uplink]
//! kind = "rock7"
//! imei = "300234010753370"
//! username = "ops@example.com"
//! password = "..."
//!
//! [inbound.webhook]
//! bind = "0.0.0.0:8080"
//! imei = "300234010753370"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sbdlink_filter::{AllowListError, CommandAllowList};
use sbdlink_frame::{
    FrameConfig, ModemPreset, OriginId, ReassemblyConfig, WireMode, HEADER_SIZE,
    MAX_FRAGMENTS_CEILING,
};
use sbdlink_gateway::{GatewayConfig, QueueConfig, TrackerConfig};
use sbdlink_proto::ProtocolVersion;
use sbdlink_transport::{
    BridgeConfig, BrokerTopics, EndpointSpec, FeedConfig, Rock7Config, WebhookConfig,
};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid allow-list: {0}")]
    AllowList(#[from] AllowListError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(ConfigError::Invalid(message.into()))
}

/// Raw file contents, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub channel: ChannelSection,
    pub local: LocalSection,
    pub reassembly: ReassemblySection,
    pub tracker: TrackerSection,
    pub queue: QueueSection,
    pub filter: FilterSection,
    pub gateway: GatewaySection,
    pub uplink: UplinkSection,
    pub broker: Option<BrokerSection>,
    pub inbound: InboundSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelSection {
    /// Block size preset; `max_block_size` overrides it.
    pub modem: Option<ModemPreset>,
    pub max_block_size: Option<usize>,
    pub max_fragments: usize,
    pub wire_mode: WireMode,
    pub version: ProtocolVersion,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            modem: None,
            max_block_size: None,
            max_fragments: sbdlink_frame::DEFAULT_MAX_FRAGMENTS,
            wire_mode: WireMode::Framed,
            version: ProtocolVersion::V2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSection {
    pub endpoint: String,
    pub version: ProtocolVersion,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            endpoint: "udpin:0.0.0.0:14550".to_string(),
            version: ProtocolVersion::V2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblySection {
    pub timeout_secs: u64,
    pub max_assemblies: usize,
    pub tombstones: usize,
}

impl Default for ReassemblySection {
    fn default() -> Self {
        let defaults = ReassemblyConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            max_assemblies: defaults.max_assemblies,
            tombstones: defaults.tombstones,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerSection {
    pub window: usize,
    pub staleness_margin: u32,
}

impl Default for TrackerSection {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            window: defaults.window,
            staleness_margin: defaults.staleness_margin,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSection {
    pub capacity: usize,
    pub min_submit_interval_secs: u64,
    pub submit_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub credit_bytes: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        let defaults = QueueConfig::default();
        Self {
            capacity: defaults.capacity,
            min_submit_interval_secs: defaults.min_submit_interval.as_secs(),
            submit_timeout_secs: defaults.submit_timeout.as_secs(),
            max_retries: defaults.max_retries,
            retry_backoff_secs: defaults.retry_backoff.as_secs(),
            credit_bytes: defaults.credit_bytes,
        }
    }
}

/// An allow-list entry: numeric id or name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IdOrName {
    Id(u32),
    Name(String),
}

impl IdOrName {
    fn entry(&self) -> String {
        match self {
            IdOrName::Id(id) => id.to_string(),
            IdOrName::Name(name) => name.clone(),
        }
    }
}

/// Unset lists keep the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterSection {
    pub message_types: Option<Vec<IdOrName>>,
    pub commands: Option<Vec<IdOrName>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    pub ingress_capacity: usize,
    pub sweep_interval_secs: u64,
    /// Zero disables the periodic summary.
    pub stats_interval_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            ingress_capacity: 64,
            sweep_interval_secs: 10,
            stats_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UplinkSection {
    /// Accept and discard; nothing leaves the machine.
    #[default]
    Loopback,
    Rock7 {
        #[serde(default)]
        imei: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_rock7_timeout")]
        request_timeout_secs: u64,
    },
    /// Publish through the `[broker]` bridge.
    Broker,
}

fn default_rock7_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    /// Where MO publications arrive from the companion session.
    pub bind: SocketAddr,
    /// Where MT publications are sent.
    pub peer: SocketAddr,
    pub account: String,
    pub thing: String,
    /// Defaults to `thing`.
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InboundSection {
    pub webhook: Option<WebhookSection>,
    pub feed: Option<FeedSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookSection {
    pub bind: SocketAddr,
    pub imei: String,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    #[serde(default = "default_webhook_age")]
    pub max_packet_age_secs: u64,
}

fn default_webhook_path() -> String {
    "/rock".to_string()
}

fn default_webhook_age() -> u64 {
    5 * 60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSection {
    pub url: String,
    pub origin: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_feed_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_feed_age")]
    pub max_packet_age_secs: u64,
    #[serde(default)]
    pub restore_trimmed_header: bool,
    #[serde(default = "default_feed_timeout")]
    pub request_timeout_secs: u64,
}

fn default_feed_poll() -> u64 {
    10
}

fn default_feed_age() -> u64 {
    10 * 60
}

fn default_feed_timeout() -> u64 {
    15
}

/// Which uplink `run` builds.
#[derive(Debug, Clone)]
pub enum UplinkPlan {
    Loopback,
    Rock7(Rock7Config),
    Broker,
}

impl UplinkPlan {
    pub fn name(&self) -> &'static str {
        match self {
            UplinkPlan::Loopback => "loopback",
            UplinkPlan::Rock7(_) => "rock7",
            UplinkPlan::Broker => "broker",
        }
    }
}

/// Validated settings, ready to construct components from.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub gateway: GatewayConfig,
    pub endpoint: EndpointSpec,
    pub uplink: UplinkPlan,
    pub webhook: Option<WebhookConfig>,
    pub feed: Option<FeedConfig>,
    pub bridge: Option<BridgeConfig>,
    pub stats_interval: Option<Duration>,
}

impl FileConfig {
    /// Read and parse a TOML file. Call [`FileConfig::resolve`] to validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }

    pub fn resolve(&self) -> Result<Resolved> {
        let frame = self.frame_config()?;
        let queue = self.queue_config()?;
        if frame.wire_mode == WireMode::Framed && queue.capacity < frame.max_fragments {
            return invalid(format!(
                "queue.capacity ({}) is smaller than channel.max_fragments ({}); \
                 the largest message could never be queued",
                queue.capacity, frame.max_fragments
            ));
        }

        let gateway = GatewayConfig {
            reassembly: self.reassembly_config(frame.max_fragments)?,
            tracker: self.tracker_config()?,
            allow_list: self.allow_list()?,
            local_version: self.local.version,
            channel_version: self.channel.version,
            ingress_capacity: positive(self.gateway.ingress_capacity, "gateway.ingress_capacity")?,
            sweep_interval: secs(self.gateway.sweep_interval_secs, "gateway.sweep_interval_secs")?,
            frame,
            queue,
            ..GatewayConfig::default()
        };

        let endpoint: EndpointSpec = self.local.endpoint.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "local.endpoint {:?} is not udpin:<ip>:<port> or udpout:<ip>:<port>",
                self.local.endpoint
            ))
        })?;

        let bridge = self.broker.as_ref().map(|broker| BridgeConfig {
            bind: broker.bind,
            peer: broker.peer,
            topics: BrokerTopics::new(&broker.account, &broker.thing),
            origin: OriginId::new(broker.origin.as_deref().unwrap_or(&broker.thing)),
        });
        if let Some(broker) = &self.broker {
            if broker.account.is_empty() || broker.thing.is_empty() {
                return invalid("broker.account and broker.thing must not be empty");
            }
        }

        let uplink = match &self.uplink {
            UplinkSection::Loopback => UplinkPlan::Loopback,
            UplinkSection::Rock7 {
                imei,
                username,
                password,
                endpoint,
                request_timeout_secs,
            } => {
                if imei.is_empty() || username.is_empty() || password.is_empty() {
                    return invalid("rock7 uplink needs imei, username and password");
                }
                let mut config = Rock7Config::new(imei, username, password);
                if let Some(endpoint) = endpoint {
                    config.endpoint = endpoint.clone();
                }
                config.request_timeout = secs(*request_timeout_secs, "uplink.request_timeout_secs")?;
                UplinkPlan::Rock7(config)
            }
            UplinkSection::Broker => {
                if bridge.is_none() {
                    return invalid("broker uplink needs a [broker] section");
                }
                UplinkPlan::Broker
            }
        };

        let webhook = match &self.inbound.webhook {
            Some(section) => {
                if section.imei.is_empty() {
                    return invalid("inbound.webhook.imei must not be empty");
                }
                if !section.path.starts_with('/') {
                    return invalid("inbound.webhook.path must start with '/'");
                }
                let mut config = WebhookConfig::new(section.bind, &section.imei);
                config.path = section.path.clone();
                config.max_packet_age = Duration::from_secs(section.max_packet_age_secs);
                Some(config)
            }
            None => None,
        };

        let feed = match &self.inbound.feed {
            Some(section) => {
                if section.url.is_empty() || section.origin.is_empty() {
                    return invalid("inbound.feed needs url and origin");
                }
                let mut config = FeedConfig::new(&section.url, OriginId::new(&section.origin));
                config.api_key = section.api_key.clone();
                config.poll_interval = secs(section.poll_interval_secs, "inbound.feed.poll_interval_secs")?;
                config.max_packet_age = Duration::from_secs(section.max_packet_age_secs);
                config.restore_trimmed_header = section.restore_trimmed_header;
                config.request_timeout =
                    secs(section.request_timeout_secs, "inbound.feed.request_timeout_secs")?;
                Some(config)
            }
            None => None,
        };

        let stats_interval = match self.gateway.stats_interval_secs {
            0 => None,
            n => Some(Duration::from_secs(n)),
        };

        Ok(Resolved {
            gateway,
            endpoint,
            uplink,
            webhook,
            feed,
            bridge,
            stats_interval,
        })
    }

    fn frame_config(&self) -> Result<FrameConfig> {
        let channel = &self.channel;
        let max_block_size = channel
            .max_block_size
            .or(channel.modem.map(ModemPreset::max_block_size))
            .unwrap_or(ModemPreset::Rock9603.max_block_size());

        match channel.wire_mode {
            WireMode::Framed if max_block_size <= HEADER_SIZE => {
                return invalid(format!(
                    "channel.max_block_size ({max_block_size}) must exceed the {HEADER_SIZE}-byte frame header"
                ));
            }
            WireMode::Raw if max_block_size == 0 => {
                return invalid("channel.max_block_size must be positive");
            }
            _ => {}
        }
        if channel.max_fragments == 0 || channel.max_fragments > MAX_FRAGMENTS_CEILING {
            return invalid(format!(
                "channel.max_fragments must be between 1 and {MAX_FRAGMENTS_CEILING}"
            ));
        }

        Ok(FrameConfig {
            max_block_size,
            max_fragments: channel.max_fragments,
            wire_mode: channel.wire_mode,
        })
    }

    fn queue_config(&self) -> Result<QueueConfig> {
        let q = &self.queue;
        Ok(QueueConfig {
            capacity: positive(q.capacity, "queue.capacity")?,
            min_submit_interval: Duration::from_secs(q.min_submit_interval_secs),
            submit_timeout: secs(q.submit_timeout_secs, "queue.submit_timeout_secs")?,
            max_retries: q.max_retries,
            retry_backoff: Duration::from_secs(q.retry_backoff_secs),
            credit_bytes: positive(q.credit_bytes, "queue.credit_bytes")?,
        })
    }

    fn reassembly_config(&self, max_fragments: usize) -> Result<ReassemblyConfig> {
        let r = &self.reassembly;
        Ok(ReassemblyConfig {
            timeout: secs(r.timeout_secs, "reassembly.timeout_secs")?,
            max_assemblies: positive(r.max_assemblies, "reassembly.max_assemblies")?,
            max_fragments,
            tombstones: r.tombstones,
        })
    }

    fn tracker_config(&self) -> Result<TrackerConfig> {
        Ok(TrackerConfig {
            window: positive(self.tracker.window, "tracker.window")?,
            staleness_margin: self.tracker.staleness_margin,
        })
    }

    fn allow_list(&self) -> Result<CommandAllowList> {
        let defaults = CommandAllowList::default();
        let types: Vec<String> = match &self.filter.message_types {
            Some(entries) => entries.iter().map(IdOrName::entry).collect(),
            None => defaults.message_types().map(|id| id.to_string()).collect(),
        };
        let commands: Vec<String> = match &self.filter.commands {
            Some(entries) => entries.iter().map(IdOrName::entry).collect(),
            None => defaults.commands().map(|id| id.to_string()).collect(),
        };
        Ok(CommandAllowList::from_entries(&types, &commands)?)
    }
}

fn positive(value: usize, name: &str) -> Result<usize> {
    if value == 0 {
        return invalid(format!("{name} must be positive"));
    }
    Ok(value)
}

fn secs(value: u64, name: &str) -> Result<Duration> {
    if value == 0 {
        return invalid(format!("{name} must be positive"));
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use sbdlink_transport::EndpointMode;

    use super::*;

    #[test]
    fn example_file_matches_defaults() {
        let resolved = FileConfig::parse(include_str!("../sbdlink.example.toml"))
            .unwrap()
            .resolve()
            .unwrap();
        let defaults = GatewayConfig::default();
        assert!(matches!(resolved.uplink, UplinkPlan::Rock7(_)));
        assert_eq!(
            resolved.gateway.allow_list.describe_types(),
            defaults.allow_list.describe_types()
        );
        assert_eq!(
            resolved.gateway.allow_list.describe_commands(),
            defaults.allow_list.describe_commands()
        );
        assert_eq!(resolved.gateway.queue, defaults.queue);
        assert_eq!(resolved.gateway.tracker, defaults.tracker);
        assert_eq!(resolved.webhook.map(|w| w.path), Some("/rock".to_string()));
    }

    #[test]
    fn empty_file_is_a_dry_run() {
        let resolved = FileConfig::parse("").unwrap().resolve().unwrap();
        assert!(matches!(resolved.uplink, UplinkPlan::Loopback));
        assert_eq!(resolved.gateway.frame.max_block_size, 270);
        assert_eq!(resolved.endpoint.mode, EndpointMode::UdpIn);
        assert_eq!(resolved.gateway.queue.min_submit_interval, Duration::from_secs(20));
        assert!(resolved.webhook.is_none());
    }

    #[test]
    fn modem_preset_and_override() {
        let preset = FileConfig::parse("[channel]\nmodem = \"9704\"\n")
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(preset.gateway.frame.max_block_size, 1024);

        let explicit = FileConfig::parse("[channel]\nmodem = \"9704\"\nmax_block_size = 340\n")
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(explicit.gateway.frame.max_block_size, 340);
    }

    #[test]
    fn block_size_must_exceed_header() {
        let err = FileConfig::parse("[channel]\nmax_block_size = 7\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        // Raw mode has no header.
        FileConfig::parse("[channel]\nmax_block_size = 7\nwire_mode = \"raw\"\n")
            .unwrap()
            .validate()
            .unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = FileConfig::parse("[queue]\ncapacity = 0\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("queue.capacity"));
    }

    #[test]
    fn rock7_needs_credentials() {
        let err = FileConfig::parse("[uplink]\nkind = \"rock7\"\nimei = \"300234010753370\"\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("username"));

        let ok = FileConfig::parse(
            "[uplink]\nkind = \"rock7\"\nimei = \"1\"\nusername = \"u\"\npassword = \"p\"\n",
        )
        .unwrap()
        .resolve()
        .unwrap();
        match ok.uplink {
            UplinkPlan::Rock7(config) => {
                assert_eq!(config.endpoint, sbdlink_transport::ROCK7_MT_URL);
                assert!(!format!("{config:?}").contains("\"p\""));
            }
            other => panic!("unexpected uplink {other:?}"),
        }
    }

    #[test]
    fn broker_uplink_needs_bridge() {
        let err = FileConfig::parse("[uplink]\nkind = \"broker\"\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("[broker]"));

        let resolved = FileConfig::parse(
            "[uplink]\nkind = \"broker\"\n\n[broker]\nbind = \"127.0.0.1:7001\"\npeer = \"127.0.0.1:7002\"\naccount = \"acct\"\nthing = \"rover\"\n",
        )
        .unwrap()
        .resolve()
        .unwrap();
        let bridge = resolved.bridge.unwrap();
        assert_eq!(bridge.topics.mt(), "lingo/acct/rover/MT");
        assert_eq!(bridge.origin.as_str(), "rover");
    }

    #[test]
    fn allow_list_accepts_ids_and_names() {
        let resolved = FileConfig::parse(
            "[filter]\nmessage_types = [\"COMMAND_LONG\", 11]\ncommands = [400, \"MAV_CMD_NAV_RETURN_TO_LAUNCH\"]\n",
        )
        .unwrap()
        .resolve()
        .unwrap();
        let allow = &resolved.gateway.allow_list;
        assert!(allow.permits_type(76));
        assert!(allow.permits_type(11));
        assert!(!allow.permits_type(73));
        assert!(allow.permits_command(20));
        assert!(!allow.permits_command(21));
    }

    #[test]
    fn unknown_names_and_fields_are_rejected() {
        let err = FileConfig::parse("[filter]\ncommands = [\"MAV_CMD_SELF_DESTRUCT\"]\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::AllowList(_)));

        assert!(matches!(
            FileConfig::parse("[channel]\nblock = 3\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn sources_are_resolved() {
        let resolved = FileConfig::parse(
            r#"
[inbound.webhook]
bind = "127.0.0.1:8080"
imei = "300234010753370"

[inbound.feed]
url = "https://io.adafruit.com/api/v2/ops/feeds/rover/data/last"
origin = "300234010753370"
restore_trimmed_header = true
"#,
        )
        .unwrap()
        .resolve()
        .unwrap();
        let webhook = resolved.webhook.unwrap();
        assert_eq!(webhook.path, "/rock");
        assert_eq!(webhook.max_packet_age, Duration::from_secs(300));
        let feed = resolved.feed.unwrap();
        assert!(feed.restore_trimmed_header);
        assert_eq!(feed.max_packet_age, Duration::from_secs(600));
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        let err = FileConfig::parse("[local]\nendpoint = \"tcp:1.2.3.4:5\"\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("local.endpoint"));
    }
}
