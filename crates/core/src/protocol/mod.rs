//! Gateway protocol: wire types, constructors and structural validators

mod builder;
mod message;
pub mod validate;

pub use builder::MAIN_RECIPIENT;
pub use message::*;
pub use validate::{
    message_type, validate_heartbeat, validate_register, validate_task_dispatch,
    validate_task_result, ValidationReport,
};
