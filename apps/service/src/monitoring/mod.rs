/// Monitoring engine module - heartbeat production pipeline
///
/// This module is responsible for:
/// - The checker contract and the type-keyed checker registry
/// - The concrete protocol checkers (tailscale ping, TCP)
/// - Executing and scheduling checks
/// - The heartbeat record produced by every check
pub mod checker;
pub mod executor;
pub mod heartbeat;
pub mod scheduler;
pub mod tailscale_ping;
pub mod tcp;

pub use checker::{Checker, CheckerRegistry};
pub use executor::{CheckExecutor, CheckOutcome};
pub use heartbeat::{Heartbeat, Status};
pub use scheduler::CheckScheduler;
