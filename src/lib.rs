pub mod builder;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod metrics;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod scenario;
pub mod seed;
pub mod transport;
