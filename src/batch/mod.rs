//! Offline Batch API workflow.
//!
//! - `request`: JSONL request lines keyed by `custom_id`
//! - `job`: job status model and the submit/poll/collect runner
//! - `results`: output parsing and correlation back to input order

mod job;
mod request;
mod results;

pub use job::*;
pub use request::*;
pub use results::*;
