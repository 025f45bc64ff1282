//! The pending side of a handshake.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::sync::oneshot;

use anchorpc::ConnectionId;

use crate::connection::Connection;
use crate::transport;

#[derive(Debug)]
pub enum Error {
    /// The target could not be resolved or listened on.
    Transport(transport::Error),
    /// The guest's connection setup hook failed.
    Setup(anyhow::Error),
    /// The handshake was torn down before it completed.
    Abandoned,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Setup(e) => write!(f, "Connection setup failed: {}", e),
            Self::Abandoned => write!(f, "Handshake abandoned before completion"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Setup(e) => Some(e.as_ref()),
            Self::Abandoned => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Resolves to the [`Connection`] once both sides have wired their calls.
///
/// Listeners are already installed when this is returned; dropping it does
/// not remove them.
pub struct Handshake {
    rx: oneshot::Receiver<Result<Connection>>,
    connection_id: Option<ConnectionId>,
}

impl Handshake {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Connection>>, connection_id: Option<ConnectionId>) -> Self {
        Self { rx, connection_id }
    }

    /// Known up front on the host, which assigns it. The guest learns it
    /// from the reply.
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }
}

impl Future for Handshake {
    type Output = Result<Connection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(Error::Abandoned)))
    }
}
