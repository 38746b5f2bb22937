// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod hub;
pub mod quote;
pub mod reconcile;
pub mod refresh;
pub mod sources;
