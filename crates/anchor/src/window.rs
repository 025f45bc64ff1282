//! # Windows & Frames
//!
//! In-memory browsing contexts. A [`Window`] is a context that can listen for
//! messages; a [`WindowProxy`] is a post-only reference to another context,
//! stamped with the sender's origin and identity; a [`Frame`] is the element
//! through which a page embeds a guest document.
//!
//! Posting follows `postMessage`: a message whose target origin is neither
//! `*` nor the receiver's origin is dropped without error.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::trace;

use crate::mailbox::Mailbox;
use crate::transport::Delivery;
use crate::transport::Endpoint;
use crate::transport::Listener;
use crate::transport::ListenerId;
use crate::transport::MessageEvent;
use crate::transport::PostOptions;
use crate::transport::Result;
use crate::transport::TargetKind;
use crate::transport::WindowId;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// A browsing context.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

struct WindowInner {
    id: WindowId,
    origin: String,
    parent: Option<Window>,
    mailbox: Mailbox,
}

impl Window {
    /// A top-level page served from `origin`.
    pub fn top(origin: impl Into<String>) -> Self {
        Self::build(origin.into(), None)
    }

    fn build(origin: String, parent: Option<Window>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed)),
                origin,
                parent,
                mailbox: Mailbox::new(),
            }),
        }
    }

    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn parent(&self) -> Option<&Window> {
        self.inner.parent.as_ref()
    }

    pub fn is_top(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// A post-only handle on `target`, as seen from code running here.
    pub fn proxy(&self, target: &Window) -> WindowProxy {
        WindowProxy {
            target: target.clone(),
            from: self.clone(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.mailbox.listener_count()
    }

    fn receive(&self, event: MessageEvent, target_origin: Option<&str>) -> Result<()> {
        if let Some(expected) = target_origin {
            if expected != "*" && expected != self.origin() {
                trace!(window = %self.id(), expected, actual = self.origin(), "target origin mismatch, message dropped");
                return Ok(());
            }
        }
        self.inner.mailbox.deliver(Delivery::Event(event))
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Window {}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id())
            .field("origin", &self.origin())
            .finish()
    }
}

/// Posting to a window directly is posting to yourself.
impl Endpoint for Window {
    fn kind(&self) -> TargetKind {
        TargetKind::Window
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        self.proxy(self).post_message(message, options)
    }

    fn add_listener(&self, listener: Listener) -> Result<ListenerId> {
        self.inner.mailbox.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.mailbox.remove_listener(id)
    }
}

/// A reference to another browsing context. It can be posted to but not
/// listened on.
#[derive(Clone, Debug)]
pub struct WindowProxy {
    target: Window,
    from: Window,
}

impl WindowProxy {
    pub fn target(&self) -> &Window {
        &self.target
    }
}

impl Endpoint for WindowProxy {
    fn kind(&self) -> TargetKind {
        TargetKind::Window
    }

    fn post_message(&self, message: Value, options: PostOptions) -> Result<()> {
        let event = MessageEvent {
            data: message,
            origin: Some(self.from.origin().to_string()),
            source: Some(self.from.id()),
            transfer: options.transfer,
        };
        self.target.receive(event, options.target_origin.as_deref())
    }
}

/// An embedded guest document.
#[derive(Clone, Debug)]
pub struct Frame {
    src: String,
    parent: Window,
    content_window: Option<Window>,
}

impl Frame {
    /// Embeds `src` in `parent`. The document's origin is derived from the
    /// URL, or is the opaque `null` origin when it has none.
    pub fn attach(parent: &Window, src: impl Into<String>) -> Self {
        let src = src.into();
        let origin = origin_of(&src).unwrap_or_else(|| "null".to_string());
        Self {
            content_window: Some(Window::build(origin, Some(parent.clone()))),
            parent: parent.clone(),
            src,
        }
    }

    /// A frame element that has not been inserted into a document yet.
    pub fn detached(parent: &Window, src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            parent: parent.clone(),
            content_window: None,
        }
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// The origin the embedded document is expected to have.
    pub fn origin(&self) -> Option<String> {
        origin_of(&self.src)
    }

    pub fn parent(&self) -> &Window {
        &self.parent
    }

    pub fn content_window(&self) -> Option<&Window> {
        self.content_window.as_ref()
    }
}

/// Reduces a URL to its origin: `scheme://host[:port]`.
///
/// Default ports (80 for http, 443 for https) are dropped, every `file:` URL
/// maps to `file://`, and a protocol-relative URL is taken as http. Returns
/// `None` for anything without an authority (`about:blank`, relative paths).
pub fn origin_of(url: &str) -> Option<String> {
    let (protocol, rest) = ["http:", "https:", "file:"]
        .iter()
        .find_map(|p| url.strip_prefix(p).map(|rest| (*p, rest)))
        .unwrap_or(("http:", url));
    let rest = rest.strip_prefix("//")?;

    if protocol == "file:" {
        return Some("file://".to_string());
    }

    let end = rest.find(['/', ':', '?', '#']).unwrap_or(rest.len());
    let host = &rest[..end];
    if host.is_empty() {
        return None;
    }

    let port = rest[end..]
        .strip_prefix(':')
        .map(|p| &p[..p.find(|c: char| !c.is_ascii_digit()).unwrap_or(p.len())])
        .unwrap_or("");
    let default_port = match protocol {
        "http:" => "80",
        "https:" => "443",
        _ => "",
    };

    if port.is_empty() || port == default_port {
        Some(format!("{protocol}//{host}"))
    } else {
        Some(format!("{protocol}//{host}:{port}"))
    }
}
