//! # Refinery Core
//!
//! Runtime-free logic for doc-refinery: content and model digests, the
//! artifact data model, the artifact store abstraction, the replacement
//! patch builder, and the model provider capability trait.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Concrete
//! backends (SQLite, HTTP model providers) live in the `doc-refinery`
//! app crate.

pub mod embedding;
pub mod error;
pub mod hash;
pub mod models;
pub mod patch;
pub mod provider;
pub mod store;

pub use error::{Error, Result};
