//! Test utilities for bblkg
//!
//! In-memory stand-ins for the network-facing seams so resolution and download
//! flows can run without shares, feeds, or a BDF server:
//!
//! - [`ScriptedBackend`] - an [`ArtifactBackend`](crate::backend::ArtifactBackend)
//!   serving a scripted set of versions and addresses
//! - [`MemoryFileMirror`] - a [`FileMirror`](crate::backend::FileMirror) over an
//!   in-memory tree
//! - [`FakeBdfServer`] - a [`BdfServer`](crate::bdf::BdfServer) holding BDF documents
//!   and consumer lists
//! - [`BdfFixture`] - builder for BDF XML
//!
//! # Example
//!
//! ```rust,no_run
//! use bblkg_cli::source::ServerKind;
//! use bblkg_cli::test_utils::{BdfFixture, FakeBdfServer};
//!
//! let server = FakeBdfServer::new();
//! server.add_bdf(BdfFixture::new("P", "1-0-0-5").built("Foo.PartFile.xml"));
//! ```

pub mod backends;
pub mod bdf_server;
pub mod fixtures;

pub use backends::{MemoryFileMirror, ScriptedBackend};
pub use bdf_server::FakeBdfServer;
pub use fixtures::BdfFixture;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has any effect. Uses `level` when given, otherwise
/// `RUST_LOG`; with neither, tests run silently.
///
/// ```bash
/// RUST_LOG=bblkg_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
