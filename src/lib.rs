//! BBLKG - Last-Known-Good dependency resolution for BentleyBuild
//!
//! A build that consumes prebuilt parts of other products asks BBLKG where the
//! last known good (LKG) artifact for a part lives, fetches it, and records what
//! was fetched so the next build can skip the download.
//!
//! # Architecture Overview
//!
//! - An [`LkgSource`](source::LkgSource) names a product and the servers its
//!   builds are published on. Its version is resolved at most once per process
//!   and then locked.
//! - A product's build description (BDF, see [`bdf`]) lists the build contexts
//!   it produced and maps the sub-parts it consumed to the LKG sources and
//!   versions it used.
//! - The [`resolver`] walks BDFs from the root source down through sub-part
//!   records, falling back to the consuming parent's BDF, and only lists server
//!   versions directly when no BDF answers.
//! - The [`download`] executor fetches through one [`backend`] per server kind
//!   and writes a [`provenance`] record next to every download.
//!
//! # Core Modules
//!
//! - [`config`] - `lkg.toml` and environment settings
//! - [`source`] - servers, sources and version lock-in
//! - [`bdf`] - build descriptions and their disk cache
//! - [`resolver`] - request resolution and `use_last_known_good`
//! - [`backend`] - file share, rsync, local, NuGet and Azure artifact backends
//! - [`download`] - at-most-once downloads with provenance
//! - [`provenance`] - provenance records for up-to-date checks
//! - [`version`] - four-part versions, ranges and pre-release suffixes
//! - [`core`] - error types and user-facing error rendering
//! - [`cli`] - the `bblkg` command
//!
//! ## Supporting Modules
//! - [`cache`] - cache directory locking
//! - [`utils`] - file system helpers and retry policy
//! - [`constants`] - shared file names and defaults

pub mod backend;
pub mod bdf;
pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod download;
pub mod provenance;
pub mod resolver;
pub mod source;
pub mod utils;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
