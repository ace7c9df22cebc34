//! `jsfabric` Core Library
//!
//! Shared functionality for `jsfabric` components:
//! - Command-line argument escaping for child engine processes
//! - The invocation contract implemented by pool members
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod escape;
pub mod invoke;
pub mod tracing_init;

pub use config::{Config, ProcessConfiguration};
pub use error::{Error, Result};
pub use escape::escape_command_line_arg;
pub use invoke::{InvokeError, ModuleStream, NodeInvoker, PoolMember};
