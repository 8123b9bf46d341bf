//! In-path RTT-spin middlebox core.
//!
//! Passively measures round-trip time on transit flows by reading
//! per-protocol latency "spin" signals (TCP VEC bits and the timestamp
//! option echo, the QUIC spin bit, PLUS PSN/PSE), performs a destination-IP
//! rewrite to a configured backend, and recomputes the affected checksums.
//! See [`Pipeline`] for the entry point.

pub mod checksum;
pub mod config;
pub mod error;
pub mod estimator;
pub mod flow_key;
pub mod headers;
pub mod pipeline;
pub mod session;
pub mod session_table;
pub mod timer_wheel;
pub mod trace;

pub use config::{ConfigError, DestinationMap, PipelineConfig, PipelineConfigBuilder};
pub use error::SpinRelayError;
pub use flow_key::{FlowKey, IpProto, PacketTuple};
pub use pipeline::{PacketBuffer, PacketOutcome, Pipeline, RawPacket};
pub use session::{ProtocolVariant, Session, SessionState};
pub use trace::{TraceRecord, TraceSink};
