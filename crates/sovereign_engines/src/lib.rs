#![forbid(unsafe_code)]

pub mod arbiter;
pub mod drift_detector;
pub mod model_router;
pub mod policy_validator;
