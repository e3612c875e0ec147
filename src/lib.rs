//! # blockdat
//!
//! A single-file container for many variable-length records keyed by a
//! 32-bit identifier, with:
//! - Fixed-size blocks chained through 4-byte next pointers
//! - An embedded free-list allocator that grows the file in 1 MiB chunks
//! - A persisted 62-way search tree as the key index
//! - A replacement protocol that never overwrites live data in place
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Container                            │
//! │         (open / lookup / read / replace / close)            │
//! └───────────────┬─────────────────────────────┬───────────────┘
//!                 │                             │
//!                 ▼                             ▼
//!        ┌─────────────────┐           ┌─────────────────┐
//!        │    Directory    │           │  Record Store   │
//!        │ (62-way tree)   │           │ (opaque bytes)  │
//!        └────────┬────────┘           └────────┬────────┘
//!                 │                             │
//!                 └──────────────┬──────────────┘
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │   BlockFile + Allocator   │
//!                  │ (chains, free list, hdr)  │
//!                  └───────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod header;

pub mod block;
mod allocator;
pub mod directory;
pub mod record;
pub mod check;
pub mod container;
pub mod shared;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DatError, Result};
pub use config::Config;
pub use container::Container;
pub use directory::Entry;
pub use shared::SharedContainer;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blockdat
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
