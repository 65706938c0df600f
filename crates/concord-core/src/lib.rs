//! Core domain model and contracts for Concord.

pub mod error;
pub mod memory;
pub mod model;
pub mod protocol;
pub mod remediation;
pub mod settings;

pub use error::ConcordError;
pub use model::*;
pub use protocol::*;
pub use remediation::*;
