//! Round-robin invocation pool over a fixed set of members.
//!
//! The [`InvocationPool`] spreads invocations across its members in strict
//! cyclic order. The only shared mutable state is the rotation cursor; it is
//! held under a mutex for the read-and-advance only, never across an
//! invocation, so slow members do not serialize callers.
//!
//! Membership is fixed for the pool's lifetime. A member whose child process
//! dies keeps receiving its share of calls; the pool neither detects nor
//! replaces it.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use jsfabric_core::{InvokeError, ModuleStream, NodeInvoker, PoolMember};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Round-robin pool of invokable members.
#[derive(Debug)]
pub struct InvocationPool<M> {
    members: Vec<M>,
    /// Index of the member that receives the next call. Always `< members.len()`.
    next_index: Mutex<usize>,
    disposed: bool,
}

impl<M> InvocationPool<M> {
    /// Create a pool over `members`, which must not be empty.
    pub fn new(members: Vec<M>) -> Result<Self, PoolError> {
        if members.is_empty() {
            return Err(PoolError::Empty);
        }

        info!(size = members.len(), "InvocationPool created");

        Ok(Self {
            members,
            next_index: Mutex::new(0),
            disposed: false,
        })
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Members in dispatch order.
    pub fn members(&self) -> &[M] {
        &self.members
    }

    pub const fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Select the member that receives the next call and advance the cursor.
    pub fn select_next(&self) -> &M {
        let index = {
            let mut next = self
                .next_index
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let index = *next;
            *next = (index + 1) % self.members.len();
            index
        };
        trace!(index, "Selected pool member");
        &self.members[index]
    }
}

#[async_trait]
impl<M: NodeInvoker> NodeInvoker for InvocationPool<M> {
    async fn invoke_from_file(
        &self,
        module_path: &str,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.select_next()
            .invoke_from_file(module_path, export_name, args, cancel)
            .await
    }

    async fn invoke_from_string(
        &self,
        module_string: &str,
        cache_identifier: Option<&str>,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.select_next()
            .invoke_from_string(module_string, cache_identifier, export_name, args, cancel)
            .await
    }

    async fn invoke_from_stream(
        &self,
        module_stream: ModuleStream,
        cache_identifier: Option<&str>,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.select_next()
            .invoke_from_stream(module_stream, cache_identifier, export_name, args, cancel)
            .await
    }

    async fn try_invoke_from_cache(
        &self,
        cache_identifier: &str,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, InvokeError> {
        self.select_next()
            .try_invoke_from_cache(cache_identifier, export_name, args, cancel)
            .await
    }
}

#[async_trait]
impl<M: PoolMember> PoolMember for InvocationPool<M> {
    /// Dispose every member in index order. Later calls are no-ops.
    ///
    /// Taking `&mut self` means no invocation can be in flight; a pool
    /// shared through an `Arc` must be reclaimed (e.g. `Arc::into_inner`)
    /// once all callers are done.
    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        info!(size = self.members.len(), "Disposing InvocationPool");
        for member in &mut self.members {
            member.dispose().await;
        }
        self.disposed = true;
    }
}

/// Errors from constructing an invocation pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A pool needs at least one member.
    #[error("Invocation pool requires at least one member")]
    Empty,
}
