//! Process-backed pool member.
//!
//! A [`ProcessMember`] owns one launched child engine process together with
//! the channel that talks to it. Invocations go straight to the channel;
//! disposal terminates the child.

use std::time::Duration;

use async_trait::async_trait;
use jsfabric_core::{InvokeError, ModuleStream, NodeInvoker, PoolMember};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::launcher::LaunchedProcess;

/// One child engine process paired with its invocation channel.
#[derive(Debug)]
pub struct ProcessMember<C> {
    process: LaunchedProcess,
    channel: C,
    termination_timeout: Duration,
}

impl<C> ProcessMember<C> {
    /// Pair `process` with the `channel` that reaches it.
    ///
    /// `termination_timeout` bounds how long disposal waits for the killed
    /// child to be reclaimed.
    pub const fn new(process: LaunchedProcess, channel: C, termination_timeout: Duration) -> Self {
        Self {
            process,
            channel,
            termination_timeout,
        }
    }

    pub const fn process(&self) -> &LaunchedProcess {
        &self.process
    }

    pub const fn channel(&self) -> &C {
        &self.channel
    }
}

#[async_trait]
impl<C: NodeInvoker> NodeInvoker for ProcessMember<C> {
    async fn invoke_from_file(
        &self,
        module_path: &str,
        export_name: Option<&str>,
        args: Option<&[Value]>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.channel
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
        self.channel
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
        self.channel
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
        self.channel
            .try_invoke_from_cache(cache_identifier, export_name, args, cancel)
            .await
    }
}

#[async_trait]
impl<C: NodeInvoker> PoolMember for ProcessMember<C> {
    async fn dispose(&mut self) {
        debug!(pid = self.process.pid(), "Disposing pool member");
        self.process.terminate(self.termination_timeout).await;
    }
}
