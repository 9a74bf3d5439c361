//! Cache root helpers shared across processes.
//!
//! The cache root (see [`crate::config::get_cache_dir`]) holds:
//!
//! ```text
//! {cache_dir}/
//! ├── .locks/                 cross-process lock files
//! ├── bdfs/                   downloaded build descriptions
//! │   ├── BdfCacheUsage.xml   last-used sidecar
//! │   └── LkgMatchIndex.json  secondary-to-primary pairings
//! └── downloads/              staging area for archives
//! ```

pub mod lock;

pub use lock::CacheLock;
