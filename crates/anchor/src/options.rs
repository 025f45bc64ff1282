//! Connection options for both sides.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use anchorpc::DEFAULT_ID_LENGTH;

use crate::rpc::Remote;
use crate::transport::Endpoint;

/// Shortest id the builders accept. Shorter ids collide too often for many
/// calls to be in flight at once.
pub const MIN_ID_LENGTH: usize = 8;

/// How outgoing calls behave.
#[derive(Debug, Clone, Copy)]
pub struct CallSettings {
    /// Fail calls that get no reply in time. Calls wait forever by default.
    pub timeout: Option<Duration>,
    /// Length of generated call ids. Values below [`MIN_ID_LENGTH`] are
    /// raised to it.
    pub id_length: usize,
}

impl CallSettings {
    pub(crate) fn effective_id_length(&self) -> usize {
        self.id_length.max(MIN_ID_LENGTH)
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout: None,
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    pub calls: CallSettings,
}

impl HostOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.calls.timeout = Some(timeout);
        self
    }

    /// Length of generated connection and call ids, at least
    /// [`MIN_ID_LENGTH`].
    pub fn id_length(mut self, len: usize) -> Self {
        self.calls.id_length = len.max(MIN_ID_LENGTH);
        self
    }
}

/// Runs on the guest once the host's methods are callable, before the guest
/// acknowledges the connection. An error aborts the handshake.
#[async_trait]
pub trait ConnectionSetup: Send + Sync + 'static {
    async fn setup(&self, remote: Remote) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> ConnectionSetup for F
where
    F: Fn(Remote) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn setup(&self, remote: Remote) -> anyhow::Result<()> {
        (self)(remote).await
    }
}

#[derive(Clone, Default)]
pub struct GuestOptions {
    pub calls: CallSettings,
    /// Talk to this endpoint instead of the one the environment implies.
    pub host_target: Option<Arc<dyn Endpoint>>,
    pub on_connection_setup: Option<Arc<dyn ConnectionSetup>>,
}

impl GuestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.calls.timeout = Some(timeout);
        self
    }

    pub fn id_length(mut self, len: usize) -> Self {
        self.calls.id_length = len.max(MIN_ID_LENGTH);
        self
    }

    pub fn host_target(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.host_target = Some(endpoint);
        self
    }

    pub fn on_connection_setup(mut self, setup: impl ConnectionSetup) -> Self {
        self.on_connection_setup = Some(Arc::new(setup));
        self
    }
}

impl std::fmt::Debug for GuestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestOptions")
            .field("calls", &self.calls)
            .field("host_target", &self.host_target.as_ref().map(|e| e.kind()))
            .field("on_connection_setup", &self.on_connection_setup.is_some())
            .finish()
    }
}
