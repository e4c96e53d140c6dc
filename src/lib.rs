//! HF Hub Stats Library
//!
//! Tracks download counts and parameter sizes of Hugging Face Hub models over
//! time and answers ranking and trend queries over the collected data.

pub mod oracle;
pub mod query;
pub mod report;
pub mod storage;
pub mod types;
