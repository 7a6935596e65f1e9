//! MACROFEED: macroeconomic time-series loader
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod catalog;
pub mod config;
pub mod data;
pub mod daterange;
pub mod engine;
pub mod error;
pub mod storage;
pub mod types;
