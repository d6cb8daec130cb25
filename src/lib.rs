pub mod app;
pub mod clock;
pub mod config;
pub mod constants;
pub mod content;
pub mod error;
pub mod fetcher;
pub mod item;
pub mod logging;
pub mod notify;
pub mod observability;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod schedule;
pub mod state;
pub mod storage;

pub use error::{Result, SyncError};
