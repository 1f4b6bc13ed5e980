//! Request correlator.
//!
//! Every privileged portal call follows the same lifecycle: lease a handle
//! token, derive the request object path, subscribe to its `Response` signal,
//! issue the method call, and wait for either the signal or the caller's
//! cancellation. A single task owns each request, so exactly one [`Outcome`]
//! is delivered and the subscription, parent export and cancellation link are
//! all released before it is.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zbus::zvariant::{OwnedObjectPath, Str};

use crate::bus::{Arg, MethodCall, Options, PortalBus, ResponseSignal, REQUEST_INTERFACE};
use crate::parent::{ExportedParent, Parent};
use crate::{Error, Result};

mod token;

pub use token::{
    request_path, session_path, HandleToken, TokenRegistry, REQUEST_PATH_PREFIX,
    SESSION_PATH_PREFIX,
};

/// Results map carried by a successful `Response`.
pub type Results = Options;

/// Response code of a granted request.
pub const RESPONSE_SUCCESS: u32 = 0;
/// Response code of a request the user dismissed.
pub const RESPONSE_CANCELLED: u32 = 1;

/// Identity of the operation that started a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationTag(&'static str);

impl OperationTag {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Terminal state of a request.
#[derive(Debug)]
pub enum Outcome {
    Succeeded(Results),
    CanceledByUser,
    Failed(Error),
}

impl Outcome {
    /// Maps a `Response` signal onto an outcome: `0` granted, `1` dismissed,
    /// anything else a broker-side failure.
    pub fn from_response(operation: &'static str, signal: ResponseSignal) -> Self {
        match signal.response {
            RESPONSE_SUCCESS => Outcome::Succeeded(signal.results),
            RESPONSE_CANCELLED => Outcome::CanceledByUser,
            response => Outcome::Failed(Error::ResponseFailed {
                operation,
                response,
            }),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::CanceledByUser => "canceled",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// Outcome of a finished request, tagged with the operation that started it.
#[derive(Debug)]
pub struct RequestResult {
    tag: OperationTag,
    request_path: Option<OwnedObjectPath>,
    outcome: Outcome,
}

impl RequestResult {
    pub fn tag(&self) -> OperationTag {
        self.tag
    }

    pub fn request_path(&self) -> Option<&OwnedObjectPath> {
        self.request_path.as_ref()
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> Outcome {
        self.outcome
    }
}

/// A privileged portal operation described as data.
pub struct Operation<T> {
    pub tag: OperationTag,
    pub interface: &'static str,
    pub method: &'static str,
    /// Human readable name used in error messages ("Camera access").
    pub description: &'static str,
    pub decode: fn(Results) -> Result<T>,
}

impl<T> Operation<T> {
    /// Extracts the decoded value from a result started by this operation.
    ///
    /// Passing a result started by another operation is a programming error
    /// and yields [`Error::OperationMismatch`].
    pub fn finish(&self, result: RequestResult) -> Result<T> {
        if result.tag != self.tag {
            error!(
                expected = %self.tag,
                found = %result.tag,
                "finish called with a result from another operation"
            );
            return Err(Error::OperationMismatch {
                expected: self.tag.name(),
                found: result.tag.name(),
            });
        }

        match result.outcome {
            Outcome::Succeeded(results) => (self.decode)(results),
            Outcome::CanceledByUser => Err(Error::Cancelled {
                operation: self.description,
            }),
            Outcome::Failed(err) => Err(err),
        }
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("tag", &self.tag)
            .field("interface", &self.interface)
            .field("method", &self.method)
            .finish()
    }
}

/// Caller side of an in-flight request. Resolves to its [`RequestResult`].
///
/// Dropping the handle does not cancel the request; use the cancellation
/// token passed at start for that.
#[derive(Debug)]
pub struct RequestHandle {
    tag: OperationTag,
    request_path: Option<OwnedObjectPath>,
    receiver: oneshot::Receiver<Outcome>,
}

impl RequestHandle {
    pub fn tag(&self) -> OperationTag {
        self.tag
    }

    /// Object path the broker will use for this request.
    pub fn request_path(&self) -> Option<&OwnedObjectPath> {
        self.request_path.as_ref()
    }

    /// Blocks the current thread until the request is over.
    ///
    /// Must not be called from a tokio worker thread; the request task needs
    /// one to make progress.
    pub fn wait_blocking(self) -> RequestResult {
        futures::executor::block_on(self)
    }

    fn resolved(tag: OperationTag, outcome: Outcome) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(outcome);
        Self {
            tag,
            request_path: None,
            receiver,
        }
    }
}

impl Future for RequestHandle {
    type Output = RequestResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Outcome::Failed(Error::Abandoned),
            Poll::Pending => return Poll::Pending,
        };

        Poll::Ready(RequestResult {
            tag: self.tag,
            request_path: self.request_path.clone(),
            outcome,
        })
    }
}

/// Starts a request on `bus` and returns the caller's handle.
///
/// `build_args` receives the rendered `parent_window` and returns the
/// positional arguments of the call; `handle_token` is added to its options
/// map (or to a trailing one if it has none). The request task is spawned on
/// the current tokio runtime; without one the handle resolves right away to
/// [`Error::NoRuntime`].
pub(crate) fn start<B, T, F>(
    bus: &B,
    sender: &str,
    tokens: &TokenRegistry,
    operation: &Operation<T>,
    build_args: F,
    parent: Option<Parent>,
    cancellable: Option<CancellationToken>,
) -> RequestHandle
where
    B: PortalBus,
    F: FnOnce(&str) -> Vec<Arg> + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(operation = %operation.tag, "Portal request started outside a tokio runtime");
        return RequestHandle::resolved(operation.tag, Outcome::Failed(Error::NoRuntime));
    };

    let token = tokens.acquire();
    let request_path = match request_path(sender, token.as_str()) {
        Ok(path) => path,
        Err(err) => {
            warn!(token = %token, ?err, "Unable to derive request path");
            return RequestHandle::resolved(operation.tag, Outcome::Failed(err));
        }
    };

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let pending = PendingRequest {
        bus: bus.clone(),
        tag: operation.tag,
        interface: operation.interface,
        method: operation.method,
        description: operation.description,
        token,
        request_path: request_path.clone(),
        parent,
        cancellable,
    };

    debug!(
        operation = %pending.tag,
        request = %pending.request_path,
        "Starting portal request"
    );

    runtime.spawn(async move {
        let outcome = pending.drive(build_args).await;
        info!(
            operation = %pending.tag,
            request = %pending.request_path,
            outcome = outcome.label(),
            "Portal request finished"
        );
        // Releases the token lease and the cancellation link before delivery.
        drop(pending);
        if outcome_tx.send(outcome).is_err() {
            debug!("Request handle dropped before the outcome was delivered");
        }
    });

    RequestHandle {
        tag: operation.tag,
        request_path: Some(request_path),
        receiver: outcome_rx,
    }
}

struct PendingRequest<B> {
    bus: B,
    tag: OperationTag,
    interface: &'static str,
    method: &'static str,
    description: &'static str,
    token: HandleToken,
    request_path: OwnedObjectPath,
    parent: Option<Parent>,
    cancellable: Option<CancellationToken>,
}

impl<B: PortalBus> PendingRequest<B> {
    async fn drive<F>(&self, build_args: F) -> Outcome
    where
        F: FnOnce(&str) -> Vec<Arg>,
    {
        if self
            .cancellable
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            debug!(request = %self.request_path, "Cancelled before start");
            return Outcome::CanceledByUser;
        }

        let mut responses = match self.bus.subscribe_response(&self.request_path).await {
            Ok(responses) => responses,
            Err(err) => {
                warn!(request = %self.request_path, ?err, "Failed to subscribe to Response");
                return Outcome::Failed(err);
            }
        };

        let parent = match &self.parent {
            None => ExportedParent::none(),
            Some(parent) => tokio::select! {
                biased;
                _ = cancelled(&self.cancellable) => {
                    debug!(request = %self.request_path, "Cancelled while exporting parent");
                    return Outcome::CanceledByUser;
                }
                exported = parent.export() => match exported {
                    Ok(exported) => exported,
                    Err(err) => return Outcome::Failed(err),
                },
            },
        };

        let call = self.method_call(build_args(parent.handle()));
        let reply = self.bus.call(call);
        tokio::pin!(reply);
        let mut awaiting_reply = true;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancelled(&self.cancellable) => {
                    self.send_close();
                    break Outcome::CanceledByUser;
                }
                signal = responses.next() => match signal {
                    Some(signal) => {
                        debug!(
                            request = %self.request_path,
                            response = signal.response,
                            "Received Request::Response"
                        );
                        break Outcome::from_response(self.description, signal);
                    }
                    None => {
                        break Outcome::Failed(Error::Bus(zbus::Error::Failure(
                            "Response subscription ended".to_string(),
                        )));
                    }
                },
                result = &mut reply, if awaiting_reply => match result {
                    Ok(()) => {
                        debug!(request = %self.request_path, "Broker accepted the request");
                        awaiting_reply = false;
                    }
                    Err(err) => {
                        warn!(request = %self.request_path, ?err, "Portal call failed");
                        break Outcome::Failed(err);
                    }
                },
            }
        };

        drop(responses);
        drop(parent);
        outcome
    }

    fn method_call(&self, mut args: Vec<Arg>) -> MethodCall {
        let token = Str::from(self.token.as_str().to_string());
        match args.iter_mut().find_map(|arg| match arg {
            Arg::Options(options) => Some(options),
            _ => None,
        }) {
            Some(options) => {
                options.insert("handle_token".to_string(), token.into());
            }
            None => {
                let mut options = Options::new();
                options.insert("handle_token".to_string(), token.into());
                args.push(Arg::Options(options));
            }
        }

        MethodCall {
            path: None,
            interface: self.interface,
            method: self.method,
            args,
        }
    }

    /// Fire-and-forget `Request.Close`; the broker's answer is ignored.
    fn send_close(&self) {
        debug!(request = %self.request_path, "Cancelled, closing request");
        let close = self.bus.call(MethodCall::at(
            self.request_path.clone(),
            REQUEST_INTERFACE,
            "Close",
        ));
        let request_path = self.request_path.clone();
        tokio::spawn(async move {
            if let Err(err) = close.await {
                debug!(request = %request_path, ?err, "Request.Close failed");
            }
        });
    }
}

async fn cancelled(token: &Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
