// ============================================
// File: crates/shroud-node/src/config.rs
// ============================================
//! # Node Configuration
//!
//! ## Creation Reason
//! Provides configuration management for a shroud node: where to listen,
//! which transports to offer, slot limits and proxy routing.
//!
//! ## Main Functionality
//! - `NodeConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Default values for every field
//!
//! ## Configuration Sections
//! - `network`: Listen address, network magic, user agent, static peers
//! - `transport`: v2 switches, rekey interval, handshake timeout, decoys
//! - `limits`: Inbound/outbound slot limits
//! - `proxy`: SOCKS5 proxy for onion (and optionally all) destinations
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "0.0.0.0:8333"
//! magic = "f9beb4d9"
//! addnode = ["203.0.113.7:8333", "abcdefghij.onion:8333"]
//!
//! [transport]
//! v2_enabled = true
//! v2_only_clearnet = true
//! rekey_interval = 224
//! capability_strategy = "cached"
//!
//! [limits]
//! max_inbound = 117
//! max_outbound = 8
//!
//! [proxy]
//! addr = "127.0.0.1:9050"
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require node restart; the policy derived from
//!   this is read-only while the node runs
//! - Validate config before node startup
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use shroud_common::PeerAddr;
use shroud_core::protocol::codec::{DEFAULT_MAGIC, MAGIC_SIZE, MAX_MESSAGE_SIZE};
use shroud_core::DEFAULT_REKEY_INTERVAL;

use crate::error::{NodeError, Result};

// ============================================
// NodeConfig
// ============================================

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Transport negotiation configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Slot limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// SOCKS5 proxy configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NodeError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the string cannot be parsed or validated.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.transport.validate()?;
        self.proxy.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Whether to accept inbound connections at all.
    #[serde(default = "default_true")]
    pub listen: bool,

    /// Network magic as 8 hex characters.
    #[serde(default = "default_magic")]
    pub magic: String,

    /// User agent sent in the greeting message.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Peers dialed at startup.
    #[serde(default)]
    pub addnode: Vec<PeerAddr>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8333))
}

const fn default_true() -> bool {
    true
}

fn default_magic() -> String {
    hex::encode(DEFAULT_MAGIC)
}

fn default_user_agent() -> String {
    format!("/shroud:{}/", env!("CARGO_PKG_VERSION"))
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        self.magic_bytes()?;
        if self.user_agent.len() > 256 {
            return Err(NodeError::config_invalid(
                "network.user_agent",
                "cannot exceed 256 bytes",
            ));
        }
        Ok(())
    }

    /// Decodes the network magic.
    ///
    /// # Errors
    /// `ConfigInvalid` unless the value is exactly 4 hex-encoded bytes.
    pub fn magic_bytes(&self) -> Result<[u8; MAGIC_SIZE]> {
        let bytes = hex::decode(&self.magic)
            .map_err(|e| NodeError::config_invalid("network.magic", e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| NodeError::config_invalid("network.magic", "must be 4 bytes"))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen: true,
            magic: default_magic(),
            user_agent: default_user_agent(),
            addnode: Vec::new(),
        }
    }
}

// ============================================
// TransportConfig
// ============================================

/// How outbound dials decide whether to advertise v2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStrategyKind {
    /// Always advertise v2.
    #[default]
    Optimistic,
    /// Remember per address whether v2 worked last time.
    Cached,
}

/// Transport negotiation section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Offer and accept the encrypted transport.
    #[serde(default = "default_true")]
    pub v2_enabled: bool,

    /// Use v1 for anonymized destinations even when v2 is enabled.
    #[serde(default)]
    pub v2_only_clearnet: bool,

    /// Packets between key rotations.
    #[serde(default = "default_rekey_interval")]
    pub rekey_interval: u32,

    /// Handshake deadline in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// TCP connect deadline in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Capability strategy for `Auto` dials.
    #[serde(default)]
    pub capability_strategy: CapabilityStrategyKind,

    /// Seconds between decoy rounds, 0 disables decoys.
    #[serde(default)]
    pub decoy_interval_secs: u64,

    /// Largest random decoy payload in bytes.
    #[serde(default = "default_max_decoy_len")]
    pub max_decoy_len: usize,
}

const fn default_rekey_interval() -> u32 {
    DEFAULT_REKEY_INTERVAL
}

const fn default_handshake_timeout() -> u64 {
    60
}

const fn default_connect_timeout() -> u64 {
    5
}

const fn default_max_decoy_len() -> usize {
    256
}

impl TransportConfig {
    fn validate(&self) -> Result<()> {
        if self.rekey_interval == 0 {
            return Err(NodeError::config_invalid(
                "transport.rekey_interval",
                "must be greater than 0",
            ));
        }

        if self.handshake_timeout_secs == 0 {
            return Err(NodeError::config_invalid(
                "transport.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.max_decoy_len > MAX_MESSAGE_SIZE {
            return Err(NodeError::config_invalid(
                "transport.max_decoy_len",
                format!("cannot exceed {MAX_MESSAGE_SIZE}"),
            ));
        }

        Ok(())
    }

    /// Handshake deadline.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// TCP connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            v2_enabled: true,
            v2_only_clearnet: false,
            rekey_interval: default_rekey_interval(),
            handshake_timeout_secs: default_handshake_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            capability_strategy: CapabilityStrategyKind::default(),
            decoy_interval_secs: 0,
            max_decoy_len: default_max_decoy_len(),
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Slot limits section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent inbound connections (handshaking included).
    #[serde(default = "default_max_inbound")]
    pub max_inbound: usize,

    /// Maximum concurrent outbound connections (handshaking included).
    #[serde(default = "default_max_outbound")]
    pub max_outbound: usize,

    /// Seconds between connection summary log lines.
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,

    /// Seconds to wait for tasks during shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

const fn default_max_inbound() -> usize {
    117
}

const fn default_max_outbound() -> usize {
    8
}

const fn default_summary_interval() -> u64 {
    60
}

const fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_inbound: default_max_inbound(),
            max_outbound: default_max_outbound(),
            summary_interval_secs: default_summary_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

// ============================================
// ProxyConfig
// ============================================

/// SOCKS5 proxy section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy address; required to reach onion destinations.
    #[serde(default)]
    pub addr: Option<SocketAddr>,

    /// Route clearnet destinations through the proxy too.
    #[serde(default)]
    pub route_clearnet: bool,
}

impl ProxyConfig {
    fn validate(&self) -> Result<()> {
        if self.route_clearnet && self.addr.is_none() {
            return Err(NodeError::config_invalid(
                "proxy.route_clearnet",
                "requires proxy.addr",
            ));
        }
        Ok(())
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================
