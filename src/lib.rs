//! pactproxy - request-recording and request-mocking HTTP proxy
//!
//! Captures backend traffic as pacts (ordered request/response exchanges)
//! and replays them deterministically without a live backend.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod message;
pub mod network;
pub mod pact;
pub mod preprocess;
pub mod proxy;
pub mod recording;
pub mod replay;
pub mod schema;
pub mod storage;

pub use error::{ProxyError, Result};
