//! Engine Logic Module
//!
//! The relay logic split into focused components:
//! - `state`: the [`Engine`] and its synchronous entry points
//! - `handlers`: one handler per protocol request
//! - `task`: the [`MonitorTask`] event loop driving the engine
//!
//! All relay state is serialized through the single task that owns the
//! engine. Link tasks, handles and the console only talk to it through
//! channels, so the registry, device queues and history need no locking and
//! each connection's lines are processed in arrival order.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::RequestHandlers;
pub use state::{Engine, EngineStats, Origin};
pub use task::{Control, MonitorTask};
