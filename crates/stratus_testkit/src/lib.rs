//! # Stratus Testkit
//!
//! Test utilities for the Stratus client.
//!
//! This crate provides:
//! - An in-memory data service with scripted fault injection
//! - Fixtures for rows, retry settings and ready-made tables
//! - Property-based test generators using proptest
//! - A concurrent admission stress harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stratus_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn retries_transient_rows() {
//!     let service = InMemoryDataService::new();
//!     service.fail_row("a", 1, StatusCode::Unavailable);
//!     let (cq, table) = manual_table(&service, fast_retry(3));
//!     // ... drive the table
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod in_memory;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::in_memory::*;
    pub use crate::stress::*;
    pub use stratus_protocol::StatusCode;
}

pub use fixtures::*;
pub use generators::*;
pub use in_memory::*;
pub use stress::*;
