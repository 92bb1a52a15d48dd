pub mod backoff;
pub mod config;
pub mod fetch;
pub mod flatten;
pub mod output;
pub mod realtime;
pub mod snapshot;
pub mod stats;
pub mod subscription;
