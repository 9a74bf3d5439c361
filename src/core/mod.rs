//! Core types shared by every BBLKG module.
//!
//! Currently this is the error taxonomy ([`LkgError`]) and its user-facing
//! presentation ([`ErrorContext`], [`user_friendly_error`]).
//!
//! Library operations that callers branch on return `Result<T, LkgError>`. Code at
//! orchestration seams (CLI, configuration loading) uses [`anyhow`] with `.context(..)`
//! and recovers the typed error with `downcast_ref` when it needs to.

pub mod error;

pub use error::{ErrorContext, LkgError, user_friendly_error};
