//! Invocation contract between the host and child engine processes.
//!
//! [`NodeInvoker`] is the capability set every pool member exposes: invoke an
//! export from a file module, from an inline string module, from a streamed
//! module, or from a module the child already has cached. The transport that
//! carries a request to the child lives behind this trait; the pool and the
//! process-backed members depend on nothing else.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// A module payload read from an arbitrary async source.
pub type ModuleStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors surfaced by an invocation channel.
///
/// The pool never inspects or rewrites these; they reach the caller exactly
/// as the member produced them.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The caller's cancellation token fired before a response arrived.
    #[error("Invocation cancelled")]
    Cancelled,

    /// The channel gave up waiting for the child.
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    /// The request or response could not be carried to or from the child.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The invoked JavaScript threw.
    #[error("Script error: {message}")]
    Script {
        message: String,
        stack: Option<String>,
    },

    /// The backing child process is no longer running.
    #[error("Child process {pid} has exited")]
    ProcessExited { pid: u32 },
}

/// Invoke functions exported by modules inside a child engine process.
///
/// `export_name` of `None` selects the module's default export. `args` of
/// `None` invokes with no arguments. The cancellation token is forwarded to
/// the channel, which decides how to honour it.
#[async_trait]
pub trait NodeInvoker: Send + Sync {
    /// Invoke an export of the module at `module_path`.
    async fn invoke_from_file(
        &self,
        module_path: &str,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError>;

    /// Invoke an export of a module given as source text, optionally
    /// caching it under `cache_identifier` for later
    /// [`try_invoke_from_cache`](Self::try_invoke_from_cache) calls.
    async fn invoke_from_string(
        &self,
        module_string: &str,
        cache_identifier: Option<&str>,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError>;

    /// Invoke an export of a module read from `module_stream`, optionally
    /// caching it under `cache_identifier`.
    async fn invoke_from_stream(
        &self,
        module_stream: ModuleStream,
        cache_identifier: Option<&str>,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError>;

    /// Invoke an export of a previously cached module.
    ///
    /// Returns `Ok(None)` when nothing is cached under `cache_identifier`.
    async fn try_invoke_from_cache(
        &self,
        cache_identifier: &str,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, InvokeError>;
}

/// An invoker with an explicit end of life.
///
/// `dispose` takes `&mut self`, so it can never overlap with an in-flight
/// invocation on the same value. Implementations must make a second call a
/// no-op.
#[async_trait]
pub trait PoolMember: NodeInvoker {
    /// Release the member's child process and channel.
    async fn dispose(&mut self);
}
