//! Clients for external services

pub mod http_runner;

pub use http_runner::HttpBacktestRunner;
