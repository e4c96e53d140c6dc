//! Shared type definitions
//!
//! This module contains the records stored in the databases and the
//! configuration shared across the crate.

pub mod config;
pub mod download;
pub mod size;
