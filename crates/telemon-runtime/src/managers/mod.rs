//! Engine-owned state managers

pub mod aggregator;
pub mod connection;
pub mod device;
pub mod registry;

pub use aggregator::{PlotSeries, StatusAggregator, StatusOutcome};
pub use connection::{ConnectionEvent, ConnectionState, PeerConnection, StateTransitionError};
pub use device::{DeviceLink, ReplyOutcome};
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistryStats};
