//! Bus capability used by the request correlator.
//!
//! The portal library never talks to a `zbus::Connection` directly. Everything
//! goes through [`PortalBus`], so tests can script broker behaviour with an
//! in-process double and production code uses [`ZbusBus`].

use std::collections::HashMap;
use std::future::Future;

use futures::stream::BoxStream;
use zbus::zvariant::{OwnedFd, OwnedObjectPath, OwnedValue};

use crate::Result;

mod zbus_bus;

pub use zbus_bus::ZbusBus;

/// Well-known name of the portal broker.
pub const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";
/// Object exporting every portal interface.
pub const PORTAL_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";
/// Interface of the per-call request objects.
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
/// Interface of long lived session objects.
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// `a{sv}` options or results map.
pub type Options = HashMap<String, OwnedValue>;

/// A single positional argument of a portal method call.
#[derive(Debug)]
pub enum Arg {
    Str(String),
    Path(OwnedObjectPath),
    Bool(bool),
    U32(u32),
    I32(i32),
    F64(f64),
    Options(Options),
}

/// A method call addressed to the portal broker.
#[derive(Debug)]
pub struct MethodCall {
    /// Target object; `None` addresses the broker's portal object.
    pub path: Option<OwnedObjectPath>,
    pub interface: &'static str,
    pub method: &'static str,
    pub args: Vec<Arg>,
}

impl MethodCall {
    /// A call on the portal object itself.
    pub fn portal(interface: &'static str, method: &'static str) -> Self {
        Self {
            path: None,
            interface,
            method,
            args: Vec::new(),
        }
    }

    /// A call on a request or session object.
    pub fn at(path: OwnedObjectPath, interface: &'static str, method: &'static str) -> Self {
        Self {
            path: Some(path),
            interface,
            method,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// The first `a{sv}` argument, if the call carries one.
    pub fn options(&self) -> Option<&Options> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Options(options) => Some(options),
            _ => None,
        })
    }

    pub fn options_mut(&mut self) -> Option<&mut Options> {
        self.args.iter_mut().find_map(|arg| match arg {
            Arg::Options(options) => Some(options),
            _ => None,
        })
    }

    /// The `handle_token` option, if present.
    pub fn handle_token(&self) -> Option<String> {
        self.options()
            .and_then(|options| options.get("handle_token"))
            .and_then(|value| <&str>::try_from(value).ok())
            .map(str::to_string)
    }
}

/// Payload of `org.freedesktop.portal.Request::Response`.
#[derive(Debug)]
pub struct ResponseSignal {
    pub response: u32,
    pub results: Options,
}

/// Live subscription to the `Response` signal of one request object.
///
/// Dropping the stream releases the subscription.
pub type ResponseSubscription = BoxStream<'static, ResponseSignal>;

/// Transport capability: the subset of a D-Bus connection the portal needs.
///
/// Every returned future is `'static` so the correlator can spawn it without
/// borrowing the bus.
pub trait PortalBus: Clone + Send + Sync + 'static {
    /// Unique name of this connection (e.g. `:1.42`).
    fn unique_name(&self) -> Option<String>;

    /// Subscribes to `Response` on `request_path`. The subscription is active
    /// once the returned future resolves.
    fn subscribe_response(
        &self,
        request_path: &OwnedObjectPath,
    ) -> impl Future<Output = Result<ResponseSubscription>> + Send + 'static;

    /// Performs a method call and discards the reply body.
    fn call(&self, call: MethodCall) -> impl Future<Output = Result<()>> + Send + 'static;

    /// Performs a method call whose reply is a single `h`.
    fn call_with_fd(
        &self,
        call: MethodCall,
    ) -> impl Future<Output = Result<OwnedFd>> + Send + 'static;

    /// Reads `interface.name` from the portal object through
    /// `org.freedesktop.DBus.Properties.Get`.
    fn get_property(
        &self,
        interface: &str,
        name: &str,
    ) -> impl Future<Output = Result<OwnedValue>> + Send + 'static;
}

/// Replaces every `.` in a unique name with `_` and drops the leading `:`,
/// matching the broker's own derivation of request and session paths.
pub fn sanitize_sender(unique_name: &str) -> String {
    unique_name
        .strip_prefix(':')
        .unwrap_or(unique_name)
        .replace('.', "_")
}
