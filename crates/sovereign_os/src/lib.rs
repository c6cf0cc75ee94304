#![forbid(unsafe_code)]

pub mod assistant_channel;
pub mod role_engines;
pub mod triad;
