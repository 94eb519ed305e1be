//! HTTP API module.
//!
//! This module provides the HTTP server, its request/response types and the
//! broadcast logger shared by every layer of the backend.

pub mod server;
pub mod types;
pub mod logs;

pub use server::{router, start_server, AppState};
pub use types::*;
pub use logs::*;
