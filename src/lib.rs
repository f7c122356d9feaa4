pub mod analyzers;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod geography;
pub mod infra;
pub mod output;
pub mod parser;
pub mod projection;
pub mod segments;
pub mod services;
pub mod snapshot;
