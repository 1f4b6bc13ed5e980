//! Parent window identification.
//!
//! Portal dialogs are made transient for the application window through a
//! `parent_window` string. X11 windows render it inline; Wayland toplevels need
//! a round trip to the compositor (`xdg_foreign`) and must be unexported once
//! the dialog is gone.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::Result;

/// Asynchronous export of a toplevel surface handle.
///
/// Implemented once per toolkit; tests provide scripted exporters.
pub trait WindowExporter: Send + Sync {
    /// Resolves to the raw handle (without the `wayland:` prefix).
    fn export(&self) -> BoxFuture<'static, Result<String>>;

    /// Revokes the handle returned by the last export.
    fn unexport(&self);
}

/// The window a portal dialog should be attached to.
#[derive(Clone)]
pub enum Parent {
    /// An X11 window id, exported inline.
    X11 { xid: u32 },
    /// A Wayland toplevel exported through `exporter`.
    Wayland(Arc<dyn WindowExporter>),
    /// A handle that is already in `parent_window` form (`x11:...`,
    /// `wayland:...`), or empty for headless callers.
    Handle(String),
}

impl fmt::Debug for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::X11 { xid } => f.debug_struct("X11").field("xid", xid).finish(),
            Parent::Wayland(_) => f.write_str("Wayland(..)"),
            Parent::Handle(handle) => f.debug_tuple("Handle").field(handle).finish(),
        }
    }
}

impl Parent {
    pub fn x11(xid: u32) -> Self {
        Parent::X11 { xid }
    }

    pub fn wayland(exporter: impl WindowExporter + 'static) -> Self {
        Parent::Wayland(Arc::new(exporter))
    }

    /// Renders the `parent_window` string. The handle stays valid until the
    /// returned guard is dropped.
    ///
    /// Dropping the future while a Wayland export is in flight unexports the
    /// window.
    pub async fn export(&self) -> Result<ExportedParent> {
        let handle = match self {
            Parent::X11 { xid } => format!("x11:{xid:x}"),
            Parent::Wayland(exporter) => {
                let in_flight = ExportInFlight(Some(exporter.clone()));
                let exported = exporter.export().await;
                in_flight.disarm();
                format!("wayland:{}", exported?)
            }
            Parent::Handle(handle) => handle.clone(),
        };
        debug!(parent_window = %handle, "Exported parent window");

        Ok(ExportedParent {
            handle,
            parent: self.clone(),
        })
    }
}

/// Unexports a Wayland window whose export was abandoned before resolving.
struct ExportInFlight(Option<Arc<dyn WindowExporter>>);

impl ExportInFlight {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ExportInFlight {
    fn drop(&mut self) {
        if let Some(exporter) = self.0.take() {
            debug!("Parent export abandoned, unexporting");
            exporter.unexport();
        }
    }
}

/// An exported parent handle. Dropping it unexports the window.
pub struct ExportedParent {
    handle: String,
    parent: Parent,
}

impl ExportedParent {
    /// Placeholder for requests without a parent window.
    pub fn none() -> Self {
        Self {
            handle: String::new(),
            parent: Parent::Handle(String::new()),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }
}

impl fmt::Debug for ExportedParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedParent")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for ExportedParent {
    fn drop(&mut self) {
        if let Parent::Wayland(exporter) = &self.parent {
            debug!(parent_window = %self.handle, "Unexporting parent window");
            exporter.unexport();
        }
    }
}
