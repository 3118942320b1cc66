//! chat-relay - streaming relay for hosted chat and image providers
//!
//! This library provides the configuration, routing, upstream provider calls,
//! SSE relay, and best-effort history persistence behind the relay binary.

pub mod config;
pub mod error;
pub mod proxy;
pub mod router;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
