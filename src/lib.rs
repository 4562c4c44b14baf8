//! Feed update pipeline: bounded concurrent fetching with conditional GET,
//! rule-based entry filtering, and transactional SQLite persistence.

pub mod config;
pub mod feed;
pub mod filter;
pub mod storage;
pub mod util;
