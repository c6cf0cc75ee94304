#![forbid(unsafe_code)]

pub mod chain;
pub mod digest;
pub mod fs_ledger;
pub mod ledger;
pub mod repo;
