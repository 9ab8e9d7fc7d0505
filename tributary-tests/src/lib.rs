//! Shared test utilities for Tributary crates
//!
//! This crate provides:
//! - **Fixtures**: data sources, run rows and descriptor chains
//! - **Mocks**: programmable connectors, a counting lock manager and a fake GitHub API
//! - **Harness**: an in-memory orchestrator stack driven by a manual clock
//! - **Assertions**: checks over persisted run rows
//!
//! # Example
//!
//! ```ignore
//! use tributary_tests::{fixtures, mocks::ScriptedConnector, TestHarness};
//!
//! #[tokio::test]
//! async fn test_sync() {
//!     let harness = TestHarness::new();
//!     let ds = harness.add_data_source(fixtures::data_source::for_tenant("acme", "demo"));
//!     harness.register("demo", vec![ScriptedConnector::new("demo", "item").into_script()]);
//!
//!     let summary = harness.run_batch().await.unwrap();
//!     assert_eq!(summary.succeeded, 1);
//! }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod harness;
pub mod mocks;

// Re-export commonly used items
pub use harness::TestHarness;
pub use mocks::{CallLog, CountingLocks, MockGithubApi, ScriptedConnector};
