#![forbid(unsafe_code)]

pub mod ask_cli;
