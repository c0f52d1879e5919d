//! Engine Utilities
//!
//! Hashing, clocks and input validation shared across components.

mod hashing;
mod time;
mod validation;

pub use hashing::{content_hash, file_hash, short_hash};
pub use time::{Clock, ManualClock, SystemClock, days_between, from_millis};
pub use validation::{ValidationError, validate_content, validate_user_id};
