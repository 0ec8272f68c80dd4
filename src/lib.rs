pub mod command;
pub mod config;
pub mod context;
pub mod election;
pub mod error;
pub mod gateway;
pub mod host;
pub mod process_monitor;
pub mod protocol;
pub mod registry;
pub mod restart;
pub mod update;
pub mod utils;

/// INFO/VERSION으로 보고되는 빌드 버전
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
