//! Integration test suite for BBLKG
//!
//! End-to-end checks of resolution, downloads, the BDF cache and the `bblkg`
//! binary. Network-facing seams are replaced with the fakes from the
//! `test-utils` feature.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: resolution walkthroughs over shares and BDF graphs
//! - **concurrency**: parallel downloads and source version lock-in
//! - **bdf_cache**: disk reuse, offline fallback and usage tracking
//! - **cli**: the `bblkg` binary against a local share

#[path = "../common/mod.rs"]
mod common;

mod bdf_cache;
mod cli;
mod concurrency;
mod scenarios;
