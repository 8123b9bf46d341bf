//! Boot-time configuration (§3 "Configuration type", §4.8 destination map).
//! Built once via [`PipelineConfigBuilder`] and treated as immutable for the
//! lifetime of the [`crate::pipeline::Pipeline`] it configures, matching the
//! teacher's `NetflowParser::builder()` -> `.with_*(..)` -> `.build()` idiom.

use std::fmt;
use std::net::Ipv4Addr;

use crate::timer_wheel::TICK_SECS;

/// Flat per-port backend-IP lookup (§4.1, §4.8): an array sized by the full
/// 16-bit port space, indexed directly by destination port. Populated once
/// at configuration time; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DestinationMap {
    by_port: Vec<Option<Ipv4Addr>>,
}

impl Default for DestinationMap {
    fn default() -> Self {
        DestinationMap { by_port: vec![None; 1 << 16] }
    }
}

impl DestinationMap {
    pub fn from_entries(entries: impl IntoIterator<Item = (u16, Ipv4Addr)>) -> Self {
        let mut map = DestinationMap::default();
        for (port, ip) in entries {
            map.by_port[port as usize] = Some(ip);
        }
        map
    }

    pub fn get(&self, dst_port: u16) -> Option<Ipv4Addr> {
        self.by_port[dst_port as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.iter().all(Option::is_none)
    }
}

/// Everything a [`crate::pipeline::Pipeline`] needs at construction and never
/// again: the destination map, the QUIC port constant, the PLUS magic/mask,
/// the session pool's capacity, and the timer wheel's tick length and
/// TIMEOUT (§4.2, §5).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub destinations: DestinationMap,
    pub quic_port: u16,
    pub plus_magic: u8,
    pub plus_magic_mask: u8,
    pub session_capacity: usize,
    pub timeout_ticks: u32,
    pub tick_secs: f64,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Reasons [`PipelineConfigBuilder::build`] can refuse a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `session_capacity` was `0`; no session could ever be created.
    ZeroSessionCapacity,
    /// A destination-map entry named port `0`, which no real flow can use.
    ZeroDestinationPort,
    /// `timeout_ticks` was `0`, which would expire every session immediately.
    ZeroTimeoutTicks,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroSessionCapacity => write!(f, "session_capacity must be at least 1"),
            ConfigError::ZeroDestinationPort => write!(f, "destination map may not map port 0"),
            ConfigError::ZeroTimeoutTicks => write!(f, "timeout_ticks must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`PipelineConfig`]. Unset fields take the defaults named in
/// spec.md: QUIC port 4433, TIMEOUT = 300 ticks of 100ms each.
pub struct PipelineConfigBuilder {
    destinations: DestinationMap,
    quic_port: u16,
    plus_magic: u8,
    plus_magic_mask: u8,
    session_capacity: usize,
    timeout_ticks: u32,
    tick_secs: f64,
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        PipelineConfigBuilder {
            destinations: DestinationMap::default(),
            quic_port: 4433,
            plus_magic: 0xD0,
            plus_magic_mask: 0xFC,
            session_capacity: 4096,
            timeout_ticks: crate::timer_wheel::TIMEOUT_TICKS,
            tick_secs: TICK_SECS,
        }
    }
}

impl PipelineConfigBuilder {
    pub fn destinations(mut self, destinations: DestinationMap) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn quic_port(mut self, port: u16) -> Self {
        self.quic_port = port;
        self
    }

    pub fn plus_magic(mut self, magic: u8, mask: u8) -> Self {
        self.plus_magic = magic;
        self.plus_magic_mask = mask;
        self
    }

    pub fn session_capacity(mut self, capacity: usize) -> Self {
        self.session_capacity = capacity;
        self
    }

    pub fn timeout_ticks(mut self, ticks: u32) -> Self {
        self.timeout_ticks = ticks;
        self
    }

    pub fn tick_secs(mut self, secs: f64) -> Self {
        self.tick_secs = secs;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        if self.session_capacity == 0 {
            return Err(ConfigError::ZeroSessionCapacity);
        }
        if self.timeout_ticks == 0 {
            return Err(ConfigError::ZeroTimeoutTicks);
        }
        if self.destinations.get(0).is_some() {
            return Err(ConfigError::ZeroDestinationPort);
        }

        Ok(PipelineConfig {
            destinations: self.destinations,
            quic_port: self.quic_port,
            plus_magic: self.plus_magic,
            plus_magic_mask: self.plus_magic_mask,
            session_capacity: self.session_capacity,
            timeout_ticks: self.timeout_ticks,
            tick_secs: self.tick_secs,
        })
    }
}
