pub mod config;
pub mod control;
pub mod crowd;
pub mod error;
pub mod ingest;
pub mod osc;
pub mod pipeline;
pub mod pose;
pub mod signal;

/// `git describe` によるビルドバージョン
pub const VERSION: &str = env!("GIT_VERSION");
