//! Replay: serving and verifying recorded exchanges

mod engine;

pub use engine::{ReplayEngine, ReplayStats};
