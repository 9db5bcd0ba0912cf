//! Recording: session state and merging of captured exchanges

mod engine;
mod session;

pub use engine::{MergeOutcome, RecordingEngine};
pub use session::Session;
