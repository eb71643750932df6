//! vidweave library crate.
//!
//! Exposes the composition pipeline, job coordinator, and persistence layer
//! for the binary and for integration testing.

pub mod codec;
pub mod compose;
pub mod config;
pub mod context;
pub mod database;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod media;
pub mod notification;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
