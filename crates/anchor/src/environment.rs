//! Where a guest is running, and how it reaches its host.

use std::sync::Arc;

use crate::link::Link;
use crate::link::Trust;
use crate::transport::Error;
use crate::transport::Result;
use crate::window::Window;
use crate::worker::ParentPort;
use crate::worker::WorkerScope;

/// The globals a guest can see. More than one may be present; the host is
/// picked in the order thread port, worker scope, parent window.
#[derive(Clone, Default)]
pub struct Environment {
    parent_port: Option<ParentPort>,
    worker_scope: Option<WorkerScope>,
    window: Option<Window>,
}

impl Environment {
    pub fn thread(port: ParentPort) -> Self {
        Self::default().with_parent_port(port)
    }

    pub fn worker(scope: WorkerScope) -> Self {
        Self::default().with_worker_scope(scope)
    }

    pub fn window(window: Window) -> Self {
        Self::default().with_window(window)
    }

    pub fn with_parent_port(mut self, port: ParentPort) -> Self {
        self.parent_port = Some(port);
        self
    }

    pub fn with_worker_scope(mut self, scope: WorkerScope) -> Self {
        self.worker_scope = Some(scope);
        self
    }

    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn is_thread(&self) -> bool {
        self.parent_port.is_some()
    }

    pub fn is_worker(&self) -> bool {
        self.worker_scope.is_some()
    }

    /// Running inside a frame: a window that is not the top-level one.
    pub fn is_iframe(&self) -> bool {
        self.window.as_ref().is_some_and(|w| !w.is_top())
    }

    /// Resolves the channel to the host.
    pub fn host_link(&self) -> Result<Link> {
        if let Some(port) = &self.parent_port {
            return Ok(Link::duplex(Arc::new(port.clone())));
        }
        if let Some(scope) = &self.worker_scope {
            return Ok(Link::duplex(Arc::new(scope.clone())));
        }
        if let Some(window) = &self.window {
            if let Some(parent) = window.parent() {
                let parent_id = parent.id();
                return Ok(Link::new(Arc::new(window.clone()), Arc::new(window.proxy(parent)))
                    .with_trust(Trust::Source(parent_id))
                    .with_target_origin("*"));
            }
        }
        Err(Error::NoTarget("guest has no host context".to_string()))
    }
}
