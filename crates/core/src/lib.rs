//! Core library for the tiered gateway overlay
//!
//! This crate contains everything that does not touch a socket:
//! - The wire protocol (message types, builders, validators)
//! - The main-side gateway registry and task tracker
//! - The event surface exposed to collaborators
//! - Node configuration

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod tracker;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayErrorCode};
pub use event::{EventBus, GatewayEvent};
pub use registry::{ConnectedGateway, GatewayFilter, GatewayRegistry};
pub use tracker::{TaskRecord, TaskState, TaskTracker};

pub type Result<T> = std::result::Result<T, GatewayError>;
