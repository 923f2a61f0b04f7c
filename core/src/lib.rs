pub mod cache;
pub mod chat;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod hierarchy;
pub mod ingest;
pub mod insight;
pub mod metrics;
pub mod record;
pub mod rng;
pub mod sample;
pub mod service;
pub mod source;
pub mod store;
pub mod text;
pub mod types;
