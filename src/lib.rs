pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod provider;
pub mod service;
pub mod stream;
pub mod transport;
