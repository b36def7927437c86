pub mod aggregator;
pub mod assertions;
pub mod client;
pub mod config;
pub mod config_validation;
pub mod errors;
pub mod executor;
pub mod metrics;
pub mod percentiles;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod stages;
pub mod thresholds;
pub mod utils;
pub mod worker;
pub mod workload;
