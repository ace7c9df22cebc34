//! jsfabric Host Library
//!
//! Out-of-process execution fabric for JavaScript engine children:
//! - Launching child engine processes with escaped arguments and a
//!   process-scoped environment
//! - Process-backed pool members pairing a child with its invocation channel
//! - Round-robin invocation pool over a fixed set of members

pub mod launcher;
pub mod member;
pub mod pool;

pub use jsfabric_core::{InvokeError, ModuleStream, NodeInvoker, PoolMember};
pub use launcher::{
    LaunchError, LaunchedProcess, ProcessStartSpec, launch, launch_members, launch_process,
};
pub use member::ProcessMember;
pub use pool::{InvocationPool, PoolError};
