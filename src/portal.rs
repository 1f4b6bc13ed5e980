use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use crate::bus::{sanitize_sender, Arg, MethodCall, PortalBus, ZbusBus};
use crate::config::PortalConfig;
use crate::parent::Parent;
use crate::request::{self, session_path, HandleToken, Operation, RequestHandle, TokenRegistry};
use crate::{Error, Result};

/// Entry point to the portal broker.
///
/// Cheap to clone; clones share the bus and the token registry.
#[derive(Clone, Debug)]
pub struct Portal<B = ZbusBus> {
    bus: B,
    sender: Arc<str>,
    tokens: TokenRegistry,
    session_tokens: TokenRegistry,
}

impl Portal<ZbusBus> {
    /// Connects to the session bus with the default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(&PortalConfig::default()).await
    }

    pub async fn with_config(config: &PortalConfig) -> Result<Self> {
        let bus = ZbusBus::session(config).await?;
        Self::with_bus(bus)
    }
}

impl<B: PortalBus> Portal<B> {
    /// Uses an already established bus capability.
    ///
    /// Fails when the bus has no unique name, since request paths cannot be
    /// derived without one.
    pub fn with_bus(bus: B) -> Result<Self> {
        let unique_name = bus.unique_name().ok_or(Error::NoUniqueName)?;
        let sender = sanitize_sender(&unique_name);
        debug!(%unique_name, %sender, "Portal ready");

        Ok(Self {
            bus,
            sender: Arc::from(sender),
            tokens: TokenRegistry::default(),
            session_tokens: TokenRegistry::default(),
        })
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Sanitized unique name used in request and session paths.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Number of requests that still hold a handle token.
    pub fn pending_requests(&self) -> usize {
        self.tokens.live()
    }

    /// Starts `operation` and returns immediately.
    ///
    /// `build_args` receives the rendered parent window handle (empty without
    /// a parent) and returns the call's positional arguments. Await the handle
    /// and pass the result to [`Operation::finish`].
    ///
    /// The request runs on the current tokio runtime. Called from a thread
    /// without one, the handle resolves to [`Error::NoRuntime`] and nothing is
    /// sent.
    pub fn start<T, F>(
        &self,
        operation: &Operation<T>,
        build_args: F,
        parent: Option<Parent>,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle
    where
        F: FnOnce(&str) -> Vec<Arg> + Send + 'static,
    {
        request::start(
            &self.bus,
            &self.sender,
            &self.tokens,
            operation,
            build_args,
            parent,
            cancellable,
        )
    }

    /// Starts `operation`, waits for it and decodes the result.
    pub async fn request<T, F>(
        &self,
        operation: &Operation<T>,
        build_args: F,
        parent: Option<Parent>,
        cancellable: Option<CancellationToken>,
    ) -> Result<T>
    where
        F: FnOnce(&str) -> Vec<Arg> + Send + 'static,
    {
        let result = self.start(operation, build_args, parent, cancellable).await;
        operation.finish(result)
    }

    /// Reads a property of the portal object.
    pub async fn property(&self, interface: &str, name: &str) -> Result<OwnedValue> {
        self.bus.get_property(interface, name).await
    }

    /// The `version` property of a portal interface.
    pub async fn interface_version(&self, interface: &str) -> Result<u32> {
        let value = self.property(interface, "version").await?;
        Ok(u32::try_from(&value)?)
    }

    /// Calls a method whose reply carries a file descriptor. Failures are
    /// logged and reported as `None`.
    pub(crate) async fn call_with_fd(&self, call: MethodCall) -> Option<std::os::fd::OwnedFd> {
        let interface = call.interface;
        let method = call.method;
        match self.bus.call_with_fd(call).await {
            Ok(fd) => Some(fd.into()),
            Err(err) => {
                warn!(interface, method, %err, "Failed to get file descriptor");
                None
            }
        }
    }

    /// Fire-and-forget call; failures are only logged. Outside a tokio
    /// runtime the call is dropped.
    pub(crate) fn notify(&self, call: MethodCall) {
        let interface = call.interface;
        let method = call.method;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(interface, method, "No tokio runtime, portal notification dropped");
            return;
        };
        let reply = self.bus.call(call);
        runtime.spawn(async move {
            if let Err(err) = reply.await {
                debug!(interface, method, %err, "Portal notification failed");
            }
        });
    }

    /// Leases a `session_handle_token` and derives the matching session path.
    pub(crate) fn session_token(&self) -> Result<(HandleToken, OwnedObjectPath)> {
        let token = self.session_tokens.acquire();
        let path = session_path(&self.sender, token.as_str())?;
        Ok((token, path))
    }
}
