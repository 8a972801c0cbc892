//! Gateway node runtime
//!
//! Runs a gateway as the `main` hub (accepting subordinate connections,
//! routing tasks) or as an `auxiliary` (one outbound connection to the main
//! gateway, reconnecting on loss). Protocol types, the registry and the task
//! tracker live in `gateway_core`.

pub mod auxiliary;
pub mod hub;
pub mod runtime;
mod status;

pub use auxiliary::AuxiliaryNode;
pub use hub::{DispatchOutcome, MainHub, MainNode, TaskRequest};
pub use runtime::GatewayRuntime;
pub use status::RuntimeStatus;

use tokio::sync::watch;

/// Resolve once `shutdown` reads true or its sender is gone
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
