//! Request matching and structural document comparison

mod cursor;
mod object;
mod request;

pub use cursor::MatchCursor;
pub use object::BodyMatcher;
pub use request::{Match, RequestMatcher};
