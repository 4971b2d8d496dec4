// ABOUTME: Library root for stowage - exposes the archiving engine for testing.
// ABOUTME: The main binary is in main.rs.

pub mod archive;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod transport;
pub mod types;
