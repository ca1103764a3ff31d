pub mod cancel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod payload;
pub mod placeholder;
pub mod stats;
pub mod template;
pub mod utils;
pub mod worker;
