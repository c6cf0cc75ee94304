#![forbid(unsafe_code)]

pub mod common;
pub mod drift;
pub mod receipt;
pub mod roles;
pub mod routing;

pub use common::{ContractViolation, Validate};
