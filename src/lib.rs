//! Country image harvester library.
//!
//! Drives a browser against an image search page for each entity in a
//! target list, extracts candidate image URLs with several strategies,
//! downloads the best of them in parallel and packages them per entity.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod browser;
pub mod config;
pub mod constants;
pub mod context;
pub mod dedup;
pub mod download;
pub mod error;
pub mod extract;
pub mod filter;
pub mod fs_utils;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod packager;
pub mod retry;
pub mod session;
pub mod targets;
