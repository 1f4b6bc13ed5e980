#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::future::Future;
use std::os::fd::OwnedFd as StdOwnedFd;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use xdg_portal_client::bus::{
    sanitize_sender, Arg, MethodCall, Options, PortalBus, ResponseSignal, ResponseSubscription,
};
use xdg_portal_client::request::{request_path, session_path, RequestHandle, RequestResult};
use xdg_portal_client::{Error, Portal, Result, WindowExporter};
use zbus::zvariant::{OwnedFd, OwnedObjectPath, OwnedValue, Str};

pub const UNIQUE_NAME: &str = ":1.42";

/// How the scripted broker answers one method call.
#[derive(Debug)]
pub enum Reply {
    /// Accepts the call and emits `Response(code, results)` right away.
    Respond(u32, Options),
    /// Accepts the call and emits a successful `Response` carrying the
    /// session handle derived from `session_handle_token`.
    Session,
    /// Fails the method call itself.
    TransportError(String),
}

/// Summary of a method call seen by the broker.
#[derive(Debug, Clone, Default)]
pub struct RecordedCall {
    pub path: Option<String>,
    pub interface: String,
    pub method: String,
    pub handle_token: Option<String>,
    pub strings: Vec<String>,
    pub paths: Vec<String>,
    pub numbers: Vec<f64>,
    pub option_keys: Vec<String>,
    pub bool_options: HashMap<String, bool>,
    pub u32_options: HashMap<String, u32>,
}

#[derive(Debug, Default)]
struct State {
    unique_name: Option<String>,
    subscribers: HashMap<String, mpsc::UnboundedSender<ResponseSignal>>,
    live_subscriptions: usize,
    calls: Vec<RecordedCall>,
    replies: HashMap<String, VecDeque<Reply>>,
    properties: HashMap<(String, String), OwnedValue>,
    fd_error: Option<String>,
}

/// In-process broker double implementing [`PortalBus`].
#[derive(Clone, Debug)]
pub struct MockBus {
    state: Arc<Mutex<State>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        let state = State {
            unique_name: Some(UNIQUE_NAME.to_string()),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A bus connection that never got a unique name.
    pub fn anonymous() -> Self {
        let bus = Self::new();
        bus.lock().unique_name = None;
        bus
    }

    pub fn portal(&self) -> Portal<MockBus> {
        Portal::with_bus(self.clone()).expect("mock bus has a unique name")
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Queues the answer to the next call of `method`. Calls without a queued
    /// answer are accepted and never answered.
    pub fn push_reply(&self, method: &str, reply: Reply) {
        self.lock()
            .replies
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set_property(&self, interface: &str, name: &str, value: OwnedValue) {
        self.lock()
            .properties
            .insert((interface.to_string(), name.to_string()), value);
    }

    pub fn fail_fd_calls(&self, message: &str) {
        self.lock().fd_error = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.lock().live_subscriptions
    }

    /// Emits `Response` on `path`. Returns whether anyone was subscribed.
    pub fn emit(&self, path: &str, response: u32, results: Options) -> bool {
        let state = self.lock();
        match state.subscribers.get(path) {
            Some(subscriber) => subscriber
                .send(ResponseSignal { response, results })
                .is_ok(),
            None => false,
        }
    }

    /// Waits until the broker saw at least `count` calls.
    pub async fn wait_for_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.lock().calls.len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("timed out waiting for portal calls");
    }

    fn record(&self, call: MethodCall) -> Result<()> {
        let recorded = summarize(&call);
        let mut state = self.lock();
        state.calls.push(recorded.clone());

        let reply = state
            .replies
            .get_mut(call.method)
            .and_then(VecDeque::pop_front);
        let sender = state.unique_name.as_deref().map(sanitize_sender);

        let (response, results) = match reply {
            None => return Ok(()),
            Some(Reply::TransportError(message)) => {
                return Err(Error::Bus(zbus::Error::Failure(message)));
            }
            Some(Reply::Respond(response, results)) => (response, results),
            Some(Reply::Session) => {
                let token =
                    session_token(&call).expect("CreateSession without session_handle_token");
                let path = session_path(sender.as_deref().unwrap_or_default(), &token)?;
                (0, results([("session_handle", str_value(path.as_str()))]))
            }
        };

        let (Some(sender), Some(token)) = (sender, recorded.handle_token) else {
            return Ok(());
        };
        let path = request_path(&sender, &token)?;
        if let Some(subscriber) = state.subscribers.get(path.as_str()) {
            let _ = subscriber.send(ResponseSignal { response, results });
        }
        Ok(())
    }
}

fn session_token(call: &MethodCall) -> Option<String> {
    call.options()?
        .get("session_handle_token")
        .and_then(|value| <&str>::try_from(value).ok())
        .map(str::to_string)
}

fn summarize(call: &MethodCall) -> RecordedCall {
    let mut recorded = RecordedCall {
        path: call.path.as_ref().map(|path| path.to_string()),
        interface: call.interface.to_string(),
        method: call.method.to_string(),
        handle_token: call.handle_token(),
        ..Default::default()
    };

    for arg in &call.args {
        match arg {
            Arg::Str(value) => recorded.strings.push(value.clone()),
            Arg::Path(value) => recorded.paths.push(value.to_string()),
            Arg::Bool(value) => recorded.numbers.push(f64::from(u8::from(*value))),
            Arg::U32(value) => recorded.numbers.push(f64::from(*value)),
            Arg::I32(value) => recorded.numbers.push(f64::from(*value)),
            Arg::F64(value) => recorded.numbers.push(*value),
            Arg::Options(options) => {
                for (key, value) in options {
                    recorded.option_keys.push(key.clone());
                    if let Ok(flag) = bool::try_from(value) {
                        recorded.bool_options.insert(key.clone(), flag);
                    }
                    if let Ok(number) = u32::try_from(value) {
                        recorded.u32_options.insert(key.clone(), number);
                    }
                }
            }
        }
    }
    recorded.option_keys.sort();
    recorded
}

/// Receiving end of one `Response` subscription. Dropping it unsubscribes.
struct Subscription {
    receiver: mpsc::UnboundedReceiver<ResponseSignal>,
    path: String,
    state: Arc<Mutex<State>>,
}

impl Stream for Subscription {
    type Item = ResponseSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.live_subscriptions -= 1;
        state.subscribers.remove(&self.path);
    }
}

impl PortalBus for MockBus {
    fn unique_name(&self) -> Option<String> {
        self.lock().unique_name.clone()
    }

    fn subscribe_response(
        &self,
        request_path: &OwnedObjectPath,
    ) -> impl Future<Output = Result<ResponseSubscription>> + Send + 'static {
        let (sender, receiver) = mpsc::unbounded_channel();
        let path = request_path.to_string();
        {
            let mut state = self.lock();
            state.live_subscriptions += 1;
            state.subscribers.insert(path.clone(), sender);
        }
        let subscription = Subscription {
            receiver,
            path,
            state: self.state.clone(),
        };
        async move { Ok(subscription.boxed()) }
    }

    fn call(&self, call: MethodCall) -> impl Future<Output = Result<()>> + Send + 'static {
        let result = self.record(call);
        async move { result }
    }

    fn call_with_fd(
        &self,
        call: MethodCall,
    ) -> impl Future<Output = Result<OwnedFd>> + Send + 'static {
        let result = self.record(call).and_then(|()| {
            if let Some(message) = self.lock().fd_error.clone() {
                return Err(Error::Bus(zbus::Error::Failure(message)));
            }
            let file = File::open("/dev/null").map_err(|err| Error::Bus(err.into()))?;
            Ok(OwnedFd::from(StdOwnedFd::from(file)))
        });
        async move { result }
    }

    fn get_property(
        &self,
        interface: &str,
        name: &str,
    ) -> impl Future<Output = Result<OwnedValue>> + Send + 'static {
        let result = self
            .lock()
            .properties
            .get(&(interface.to_string(), name.to_string()))
            .map(|value| value.try_clone().expect("cloneable property"))
            .ok_or_else(|| {
                Error::Bus(zbus::Error::Failure(format!(
                    "No such property {interface}.{name}"
                )))
            });
        async move { result }
    }
}

/// Wayland exporter double recording when it was asked to export and
/// unexport, relative to the broker's call log.
#[derive(Clone)]
pub struct MockExporter {
    bus: MockBus,
    handle: String,
    delay: Duration,
    events: Arc<Mutex<Vec<ExporterEvent>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExporterEvent {
    /// Export started after `calls` broker calls.
    Export { calls: usize },
    /// Unexport after `calls` broker calls.
    Unexport { calls: usize },
}

impl MockExporter {
    pub fn new(bus: &MockBus, handle: &str) -> Self {
        Self {
            bus: bus.clone(),
            handle: handle.to_string(),
            delay: Duration::ZERO,
            events: Arc::default(),
        }
    }

    /// Makes the export take `delay` to resolve.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn events(&self) -> Vec<ExporterEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl WindowExporter for MockExporter {
    fn export(&self) -> BoxFuture<'static, Result<String>> {
        self.events.lock().unwrap().push(ExporterEvent::Export {
            calls: self.bus.calls().len(),
        });
        let handle = self.handle.clone();
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(handle)
        }
        .boxed()
    }

    fn unexport(&self) {
        self.events.lock().unwrap().push(ExporterEvent::Unexport {
            calls: self.bus.calls().len(),
        });
    }
}

pub fn str_value(value: &str) -> OwnedValue {
    OwnedValue::from(Str::from(value.to_string()))
}

pub fn results<const N: usize>(entries: [(&str, OwnedValue); N]) -> Options {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Awaits a request, failing the test instead of hanging.
pub async fn resolve(handle: RequestHandle) -> RequestResult {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("request did not resolve")
}
