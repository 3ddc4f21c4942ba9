// ============================================
// File: crates/shroud-node/src/services/policy.rs
// ============================================
//! # Connection Policy
//!
//! ## Creation Reason
//! Decides, per connection attempt, how to reach a peer and whether to
//! offer the encrypted transport. Built once from the configuration and
//! never changed while the node runs.
//!
//! ## Main Functionality
//! - `ConnectionPolicy`: Static rules plus the pluggable capability strategy
//! - `DialHint`: Caller override (`Auto`, `ForceV1`, `ForceV2`)
//! - `DialPlan`: Route and advertise decision for one dial
//! - `V2CapabilityStrategy`: Whether `Auto` dials advertise v2
//!
//! ## Dial Decision
//! ```text
//!                 ┌──────────────────────┐
//!   target ──────►│ anonymized?          │── yes ─► proxy required ─► Route::Proxy
//!                 └─────────┬────────────┘
//!                           │ no
//!                           ▼
//!                 route_clearnet && proxy ? Route::Proxy : Route::Direct
//!
//!   advertise_v2:
//!     v2 disabled                          → false
//!     anonymized && v2_only_clearnet       → false (whatever the hint)
//!     clearnet && v2_only_clearnet && ForceV1 → rejected
//!     ForceV1 → false, ForceV2 → true, Auto → strategy
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The policy is shared by reference across all connection tasks; it
//!   has no locks. Strategies that learn keep their own interior state
//!
//! ## Last Modified
//! v0.1.0 - Initial policy implementation

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use shroud_common::PeerAddr;
use shroud_core::{FrameCodec, NegotiationPath};
use shroud_transport::Route;

use crate::config::{CapabilityStrategyKind, NodeConfig};
use crate::error::{NodeError, Result};

// ============================================
// DialHint / DialPlan
// ============================================

/// Caller's preference for one outbound dial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DialHint {
    /// Let the capability strategy decide.
    #[default]
    Auto,
    /// Do not advertise v2.
    ForceV1,
    /// Advertise v2 even if the strategy would not.
    ForceV2,
}

/// Outcome of [`ConnectionPolicy::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPlan {
    /// How to reach the target.
    pub route: Route,
    /// Whether to open with the v2 preamble.
    pub advertise_v2: bool,
}

// ============================================
// V2CapabilityStrategy
// ============================================

/// Decides whether `Auto` dials advertise v2.
pub trait V2CapabilityStrategy: Send + Sync + fmt::Debug {
    /// Returns `true` to send the v2 preamble to `target`.
    fn should_advertise(&self, target: &PeerAddr) -> bool;

    /// Learns from a finished negotiation.
    fn record(&self, target: &PeerAddr, path: NegotiationPath);

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Always advertises v2; downgrade handles v1-only peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticStrategy;

impl V2CapabilityStrategy for OptimisticStrategy {
    fn should_advertise(&self, _target: &PeerAddr) -> bool {
        true
    }

    fn record(&self, _target: &PeerAddr, _path: NegotiationPath) {}

    fn name(&self) -> &'static str {
        "optimistic"
    }
}

/// Remembers per address whether the last advertised attempt worked.
///
/// Unknown peers are advertised to. A downgrade marks the peer v1-only;
/// an encrypted session marks it v2-capable again.
#[derive(Debug, Default)]
pub struct CachedCapabilityStrategy {
    known: DashMap<PeerAddr, bool>,
}

impl CachedCapabilityStrategy {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached capability of `target`, if any.
    #[must_use]
    pub fn known_capability(&self, target: &PeerAddr) -> Option<bool> {
        self.known.get(target).map(|entry| *entry.value())
    }
}

impl V2CapabilityStrategy for CachedCapabilityStrategy {
    fn should_advertise(&self, target: &PeerAddr) -> bool {
        self.known_capability(target).unwrap_or(true)
    }

    fn record(&self, target: &PeerAddr, path: NegotiationPath) {
        match path {
            NegotiationPath::Downgrade => {
                debug!(%target, "Peer answered v1, caching as v1-only");
                self.known.insert(target.clone(), false);
            }
            NegotiationPath::Encrypted => {
                self.known.insert(target.clone(), true);
            }
            NegotiationPath::PlainV1 | NegotiationPath::NotAdvertised => {}
        }
    }

    fn name(&self) -> &'static str {
        "cached"
    }
}

// ============================================
// ConnectionPolicy
// ============================================

/// Process-wide connection rules.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Offer and accept the encrypted transport.
    pub v2_enabled: bool,
    /// Use v1 for anonymized destinations.
    pub v2_only_clearnet: bool,
    /// Packets between key rotations.
    pub rekey_interval: u32,
    /// Handshake deadline.
    pub handshake_timeout: Duration,
    /// Inbound slot limit.
    pub max_inbound: usize,
    /// Outbound slot limit.
    pub max_outbound: usize,
    /// SOCKS5 proxy, if configured.
    pub proxy: Option<SocketAddr>,
    /// Route clearnet destinations through the proxy.
    pub route_clearnet: bool,
    /// Payload of the greeting message.
    pub user_agent: String,
    codec: FrameCodec,
    strategy: Arc<dyn V2CapabilityStrategy>,
}

impl ConnectionPolicy {
    /// Builds the policy from a validated configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` if the network magic does not decode.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let strategy: Arc<dyn V2CapabilityStrategy> = match config.transport.capability_strategy {
            CapabilityStrategyKind::Optimistic => Arc::new(OptimisticStrategy),
            CapabilityStrategyKind::Cached => Arc::new(CachedCapabilityStrategy::new()),
        };

        Ok(Self {
            v2_enabled: config.transport.v2_enabled,
            v2_only_clearnet: config.transport.v2_only_clearnet,
            rekey_interval: config.transport.rekey_interval,
            handshake_timeout: config.transport.handshake_timeout(),
            max_inbound: config.limits.max_inbound,
            max_outbound: config.limits.max_outbound,
            proxy: config.proxy.addr,
            route_clearnet: config.proxy.route_clearnet,
            user_agent: config.network.user_agent.clone(),
            codec: FrameCodec::new(config.network.magic_bytes()?),
            strategy,
        })
    }

    /// Replaces the capability strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn V2CapabilityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Frame codec for the configured network.
    #[must_use]
    pub const fn codec(&self) -> FrameCodec {
        self.codec
    }

    /// Name of the active capability strategy.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Plans an outbound dial.
    ///
    /// # Errors
    /// `Policy` if the target is anonymized and no proxy is configured, or
    /// if `ForceV1` is requested for a clearnet target while v2 is
    /// restricted to clearnet.
    pub fn plan(&self, target: &PeerAddr, hint: DialHint) -> Result<DialPlan> {
        let anonymized = target.is_anonymized();

        let route = match (anonymized, self.proxy) {
            (true, Some(proxy)) => Route::Proxy(proxy),
            (true, None) => {
                return Err(NodeError::policy(format!(
                    "{target} is anonymized and no proxy is configured"
                )))
            }
            (false, Some(proxy)) if self.route_clearnet => Route::Proxy(proxy),
            (false, _) => Route::Direct,
        };

        let advertise_v2 = if !self.v2_enabled || (anonymized && self.v2_only_clearnet) {
            false
        } else {
            match hint {
                DialHint::ForceV1 if self.v2_only_clearnet => {
                    return Err(NodeError::policy(format!(
                        "v1 refused for clearnet {target} while v2_only_clearnet is set"
                    )))
                }
                DialHint::ForceV1 => false,
                DialHint::ForceV2 => true,
                DialHint::Auto => self.strategy.should_advertise(target),
            }
        };

        debug!(%target, %route, advertise_v2, ?hint, "Dial planned");
        Ok(DialPlan {
            route,
            advertise_v2,
        })
    }

    /// Feeds a finished outbound negotiation back into the strategy.
    pub fn record_outcome(&self, target: &PeerAddr, path: NegotiationPath) {
        self.strategy.record(target, path);
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        let config = NodeConfig::default();
        Self {
            v2_enabled: config.transport.v2_enabled,
            v2_only_clearnet: config.transport.v2_only_clearnet,
            rekey_interval: config.transport.rekey_interval,
            handshake_timeout: config.transport.handshake_timeout(),
            max_inbound: config.limits.max_inbound,
            max_outbound: config.limits.max_outbound,
            proxy: None,
            route_clearnet: false,
            user_agent: config.network.user_agent,
            codec: FrameCodec::default(),
            strategy: Arc::new(OptimisticStrategy),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn onion() -> PeerAddr {
        "abcdefghij.onion:8333".parse().unwrap()
    }

    fn clearnet() -> PeerAddr {
        "203.0.113.7:8333".parse().unwrap()
    }

    fn proxy() -> SocketAddr {
        "127.0.0.1:9050".parse().unwrap()
    }

    #[test]
    fn test_clearnet_default_plan() {
        let policy = ConnectionPolicy::default();
        let plan = policy.plan(&clearnet(), DialHint::Auto).unwrap();
        assert_eq!(plan.route, Route::Direct);
        assert!(plan.advertise_v2);
    }

    #[test]
    fn test_onion_requires_proxy() {
        let policy = ConnectionPolicy::default();
        let err = policy.plan(&onion(), DialHint::Auto).unwrap_err();
        assert!(matches!(err, NodeError::Policy { .. }));
    }

    #[test]
    fn test_onion_forced_v1_under_clearnet_restriction() {
        let policy = ConnectionPolicy {
            v2_only_clearnet: true,
            proxy: Some(proxy()),
            ..ConnectionPolicy::default()
        };
        for hint in [DialHint::Auto, DialHint::ForceV2] {
            let plan = policy.plan(&onion(), hint).unwrap();
            assert_eq!(plan.route, Route::Proxy(proxy()));
            assert!(!plan.advertise_v2);
        }
        // Clearnet still goes direct with v2
        let plan = policy.plan(&clearnet(), DialHint::Auto).unwrap();
        assert_eq!(plan.route, Route::Direct);
        assert!(plan.advertise_v2);
    }

    #[test]
    fn test_force_v1_refused_for_clearnet_under_restriction() {
        let policy = ConnectionPolicy {
            v2_only_clearnet: true,
            ..ConnectionPolicy::default()
        };
        assert!(policy.plan(&clearnet(), DialHint::ForceV1).is_err());
    }

    #[test]
    fn test_v2_disabled_never_advertises() {
        let policy = ConnectionPolicy {
            v2_enabled: false,
            ..ConnectionPolicy::default()
        };
        for hint in [DialHint::Auto, DialHint::ForceV1, DialHint::ForceV2] {
            assert!(!policy.plan(&clearnet(), hint).unwrap().advertise_v2);
        }
    }

    #[test]
    fn test_route_clearnet_through_proxy() {
        let policy = ConnectionPolicy {
            proxy: Some(proxy()),
            route_clearnet: true,
            ..ConnectionPolicy::default()
        };
        let plan = policy.plan(&clearnet(), DialHint::ForceV1).unwrap();
        assert!(plan.route.is_proxied());
        assert!(!plan.advertise_v2);
    }

    #[test]
    fn test_cached_strategy_learns_downgrade() {
        let cache = Arc::new(CachedCapabilityStrategy::new());
        let policy = ConnectionPolicy::default().with_strategy(cache.clone());
        assert_eq!(policy.strategy_name(), "cached");

        assert!(policy.plan(&clearnet(), DialHint::Auto).unwrap().advertise_v2);
        policy.record_outcome(&clearnet(), NegotiationPath::Downgrade);
        assert_eq!(cache.known_capability(&clearnet()), Some(false));
        assert!(!policy.plan(&clearnet(), DialHint::Auto).unwrap().advertise_v2);

        // An explicit override still wins
        assert!(policy.plan(&clearnet(), DialHint::ForceV2).unwrap().advertise_v2);

        policy.record_outcome(&clearnet(), NegotiationPath::Encrypted);
        assert!(policy.plan(&clearnet(), DialHint::Auto).unwrap().advertise_v2);
    }

    #[test]
    fn test_from_config() {
        let config = NodeConfig::from_str(
            "[transport]\nv2_only_clearnet = true\ncapability_strategy = \"cached\"\n[proxy]\naddr = \"127.0.0.1:9050\"\n",
        )
        .unwrap();
        let policy = ConnectionPolicy::from_config(&config).unwrap();
        assert!(policy.v2_only_clearnet);
        assert_eq!(policy.proxy, Some(proxy()));
        assert_eq!(policy.strategy_name(), "cached");
    }
}
