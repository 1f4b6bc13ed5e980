//! Screen cast and remote desktop sessions.
//!
//! A session is created with `CreateSession`, configured with
//! `SelectSources`/`SelectDevices` and activated with `Start`; each of those
//! steps is a full portal request. Once active, a screen cast session hands
//! out PipeWire streams and a remote desktop session accepts input events.

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue, Value};

use crate::bus::{Arg, MethodCall, Options, PortalBus, SESSION_INTERFACE};
use crate::desktop::{insert_str, take};
use crate::parent::Parent;
use crate::request::{HandleToken, Operation, OperationTag, Results};
use crate::{Error, Portal, Result};

pub const SCREENCAST_INTERFACE: &str = "org.freedesktop.portal.ScreenCast";
pub const REMOTE_DESKTOP_INTERFACE: &str = "org.freedesktop.portal.RemoteDesktop";

bitflags::bitflags! {
    /// Kinds of sources a screen cast may capture.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OutputType: u32 {
        const MONITOR = 1;
        const WINDOW = 2;
    }
}

bitflags::bitflags! {
    /// Input devices a remote desktop session may emulate.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeviceType: u32 {
        const KEYBOARD = 1;
        const POINTER = 2;
        const TOUCHSCREEN = 4;
    }
}

pub const SCREENCAST_CREATE_SESSION: Operation<OwnedObjectPath> = Operation {
    tag: OperationTag::new("screencast.create_session"),
    interface: SCREENCAST_INTERFACE,
    method: "CreateSession",
    description: "Screen cast session creation",
    decode: decode_session_handle,
};

pub const SCREENCAST_SELECT_SOURCES: Operation<()> = Operation {
    tag: OperationTag::new("screencast.select_sources"),
    interface: SCREENCAST_INTERFACE,
    method: "SelectSources",
    description: "Screen cast source selection",
    decode: decode_nothing,
};

pub const SCREENCAST_START: Operation<Started> = Operation {
    tag: OperationTag::new("screencast.start"),
    interface: SCREENCAST_INTERFACE,
    method: "Start",
    description: "Screen cast",
    decode: decode_screencast_started,
};

pub const REMOTE_DESKTOP_CREATE_SESSION: Operation<OwnedObjectPath> = Operation {
    tag: OperationTag::new("remote_desktop.create_session"),
    interface: REMOTE_DESKTOP_INTERFACE,
    method: "CreateSession",
    description: "Remote desktop session creation",
    decode: decode_session_handle,
};

pub const REMOTE_DESKTOP_SELECT_DEVICES: Operation<()> = Operation {
    tag: OperationTag::new("remote_desktop.select_devices"),
    interface: REMOTE_DESKTOP_INTERFACE,
    method: "SelectDevices",
    description: "Remote desktop device selection",
    decode: decode_nothing,
};

pub const REMOTE_DESKTOP_START: Operation<Started> = Operation {
    tag: OperationTag::new("remote_desktop.start"),
    interface: REMOTE_DESKTOP_INTERFACE,
    method: "Start",
    description: "Remote desktop",
    decode: decode_remote_desktop_started,
};

/// Results of a successful `Start`.
#[derive(Debug, Default)]
pub struct Started {
    pub streams: Vec<Stream>,
    pub devices: DeviceType,
}

/// A PipeWire stream granted by the broker.
#[derive(Debug)]
pub struct Stream {
    node_id: u32,
    properties: HashMap<String, OwnedValue>,
}

impl Stream {
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn properties(&self) -> &HashMap<String, OwnedValue> {
        &self.properties
    }

    /// Opaque identifier stable across restored sessions.
    pub fn id(&self) -> Option<String> {
        self.properties
            .get("id")
            .and_then(|value| value.try_clone().ok())
            .and_then(|owned| String::try_from(owned).ok())
    }

    pub fn source_type(&self) -> Option<OutputType> {
        self.properties
            .get("source_type")
            .and_then(|value| u32::try_from(value).ok())
            .map(OutputType::from_bits_truncate)
    }

    /// Logical size of the stream in compositor coordinates.
    pub fn size(&self) -> Option<(i32, i32)> {
        self.pair("size")
    }

    pub fn position(&self) -> Option<(i32, i32)> {
        self.pair("position")
    }

    fn pair(&self, key: &str) -> Option<(i32, i32)> {
        let value: Value = self.properties.get(key)?.try_clone().ok()?.into();
        value.try_into().ok()
    }
}

fn decode_nothing(_results: Results) -> Result<()> {
    Ok(())
}

/// `session_handle` is a string in older broker versions and an object path
/// in newer ones.
fn decode_session_handle(mut results: Results) -> Result<OwnedObjectPath> {
    let value: Value = take(&mut results, "Session creation", "session_handle")?.into();
    match value {
        Value::ObjectPath(path) => Ok(path.into()),
        Value::Str(path) => Ok(OwnedObjectPath::try_from(path.as_str())?),
        _ => Err(zvariant::Error::IncorrectType.into()),
    }
}

fn decode_streams(value: OwnedValue) -> Result<Vec<Stream>> {
    let value: Value = value.into();
    let entries: Vec<(u32, HashMap<String, OwnedValue>)> = value.try_into()?;
    Ok(entries
        .into_iter()
        .map(|(node_id, properties)| Stream {
            node_id,
            properties,
        })
        .collect())
}

fn decode_devices(results: &mut Results) -> Result<DeviceType> {
    match results.remove("devices") {
        Some(value) => Ok(DeviceType::from_bits_truncate(u32::try_from(value)?)),
        None => Ok(DeviceType::empty()),
    }
}

fn decode_screencast_started(mut results: Results) -> Result<Started> {
    let streams = decode_streams(take(
        &mut results,
        SCREENCAST_START.description,
        "streams",
    )?)?;
    Ok(Started {
        streams,
        devices: DeviceType::empty(),
    })
}

fn decode_remote_desktop_started(mut results: Results) -> Result<Started> {
    let devices = decode_devices(&mut results)?;
    let streams = match results.remove("streams") {
        Some(value) => decode_streams(value)?,
        None => Vec::new(),
    };
    Ok(Started { streams, devices })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    ScreenCast,
    RemoteDesktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created and configured, not started yet.
    Initial,
    Active,
    Closed,
}

/// Key or button state passed to the input notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released = 0,
    Pressed = 1,
}

/// Scroll axis of a discrete scroll, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Vertical = 0,
    Horizontal = 1,
}

impl<B: PortalBus> Portal<B> {
    /// Creates a screen cast session and selects its sources.
    pub async fn create_screencast_session(
        &self,
        outputs: OutputType,
        multiple: bool,
        cancellable: Option<CancellationToken>,
    ) -> Result<Session<B>> {
        let mut session = self
            .create_session(
                &SCREENCAST_CREATE_SESSION,
                SessionKind::ScreenCast,
                cancellable.clone(),
            )
            .await?;

        if let Err(err) = session.select_sources(outputs, multiple, cancellable).await {
            session.close();
            return Err(err);
        }

        Ok(session)
    }

    /// Creates a remote desktop session, selects the input devices and, when
    /// `outputs` is not empty, the screen cast sources shown alongside them.
    pub async fn create_remote_desktop_session(
        &self,
        devices: DeviceType,
        outputs: OutputType,
        multiple: bool,
        cancellable: Option<CancellationToken>,
    ) -> Result<Session<B>> {
        let mut session = self
            .create_session(
                &REMOTE_DESKTOP_CREATE_SESSION,
                SessionKind::RemoteDesktop,
                cancellable.clone(),
            )
            .await?;

        let mut configured = session.select_devices(devices, cancellable.clone()).await;
        if configured.is_ok() && !outputs.is_empty() {
            configured = session.select_sources(outputs, multiple, cancellable).await;
        }

        if let Err(err) = configured {
            session.close();
            return Err(err);
        }

        Ok(session)
    }

    async fn create_session(
        &self,
        operation: &Operation<OwnedObjectPath>,
        kind: SessionKind,
        cancellable: Option<CancellationToken>,
    ) -> Result<Session<B>> {
        let (token, expected) = self.session_token()?;
        let mut options = Options::new();
        insert_str(&mut options, "session_handle_token", token.as_str());

        let path = self
            .request(
                operation,
                move |_parent_window| vec![Arg::Options(options)],
                None,
                cancellable,
            )
            .await?;

        if path != expected {
            debug!(%path, %expected, "Broker picked a different session path");
        }
        info!(session = %path, ?kind, "Portal session created");

        Ok(Session {
            portal: self.clone(),
            path,
            kind,
            state: SessionState::Initial,
            devices: DeviceType::empty(),
            streams: Vec::new(),
            _token: token,
        })
    }
}

/// A screen cast or remote desktop session.
///
/// Dropping a session does not close it; call [`Session::close`].
#[derive(Debug)]
pub struct Session<B: PortalBus> {
    portal: Portal<B>,
    path: OwnedObjectPath,
    kind: SessionKind,
    state: SessionState,
    devices: DeviceType,
    streams: Vec<Stream>,
    _token: HandleToken,
}

impl<B: PortalBus> Session<B> {
    pub fn path(&self) -> &OwnedObjectPath {
        &self.path
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Devices granted by `Start`; empty before.
    pub fn devices(&self) -> DeviceType {
        self.devices
    }

    /// Streams granted by `Start`; empty before.
    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    async fn select_sources(
        &self,
        outputs: OutputType,
        multiple: bool,
        cancellable: Option<CancellationToken>,
    ) -> Result<()> {
        let path = self.path.clone();
        let mut options = Options::new();
        options.insert("types".to_string(), OwnedValue::from(outputs.bits()));
        options.insert("multiple".to_string(), OwnedValue::from(multiple));

        self.portal
            .request(
                &SCREENCAST_SELECT_SOURCES,
                move |_parent_window| vec![Arg::Path(path), Arg::Options(options)],
                None,
                cancellable,
            )
            .await
    }

    async fn select_devices(
        &self,
        devices: DeviceType,
        cancellable: Option<CancellationToken>,
    ) -> Result<()> {
        let path = self.path.clone();
        let mut options = Options::new();
        options.insert("types".to_string(), OwnedValue::from(devices.bits()));

        self.portal
            .request(
                &REMOTE_DESKTOP_SELECT_DEVICES,
                move |_parent_window| vec![Arg::Path(path), Arg::Options(options)],
                None,
                cancellable,
            )
            .await
    }

    /// Starts the session, showing the broker's selection dialog attached to
    /// `parent`.
    ///
    /// Only a session that was never started can be started. On success the
    /// granted streams and devices are available through the getters.
    pub async fn start(
        &mut self,
        parent: Option<Parent>,
        cancellable: Option<CancellationToken>,
    ) -> Result<()> {
        if self.state != SessionState::Initial {
            return Err(Error::InvalidSession(format!(
                "{} cannot be started while {:?}",
                self.path, self.state
            )));
        }

        let operation = match self.kind {
            SessionKind::ScreenCast => &SCREENCAST_START,
            SessionKind::RemoteDesktop => &REMOTE_DESKTOP_START,
        };
        let path = self.path.clone();
        let started = self
            .portal
            .request(
                operation,
                move |parent_window| {
                    vec![
                        Arg::Path(path),
                        Arg::Str(parent_window.to_string()),
                        Arg::Options(Options::new()),
                    ]
                },
                parent,
                cancellable,
            )
            .await?;

        info!(
            session = %self.path,
            streams = started.streams.len(),
            devices = ?started.devices,
            "Portal session started"
        );
        self.streams = started.streams;
        self.devices = started.devices;
        self.state = SessionState::Active;
        Ok(())
    }

    /// Opens the PipeWire remote carrying this session's streams.
    ///
    /// Returns `None` if the session is not active or the broker refuses.
    pub async fn open_pipewire_remote(&self) -> Option<OwnedFd> {
        if self.state != SessionState::Active {
            warn!(session = %self.path, state = ?self.state, "Session is not active");
            return None;
        }

        self.portal
            .call_with_fd(
                MethodCall::portal(SCREENCAST_INTERFACE, "OpenPipeWireRemote")
                    .arg(Arg::Path(self.path.clone()))
                    .arg(Arg::Options(Options::new())),
            )
            .await
    }

    /// Closes the session. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        debug!(session = %self.path, "Closing portal session");
        self.portal
            .notify(MethodCall::at(self.path.clone(), SESSION_INTERFACE, "Close"));
        self.state = SessionState::Closed;
        self.streams.clear();
    }

    pub async fn notify_pointer_motion(&self, dx: f64, dy: f64) -> Result<()> {
        self.notify_input(
            DeviceType::POINTER,
            "NotifyPointerMotion",
            Options::new(),
            vec![Arg::F64(dx), Arg::F64(dy)],
        )
        .await
    }

    /// Moves the pointer to `(x, y)` within the stream `stream`.
    pub async fn notify_pointer_motion_absolute(&self, stream: u32, x: f64, y: f64) -> Result<()> {
        self.notify_input(
            DeviceType::POINTER,
            "NotifyPointerMotionAbsolute",
            Options::new(),
            vec![Arg::U32(stream), Arg::F64(x), Arg::F64(y)],
        )
        .await
    }

    /// `button` is an evdev button code.
    pub async fn notify_pointer_button(&self, button: i32, state: KeyState) -> Result<()> {
        self.notify_input(
            DeviceType::POINTER,
            "NotifyPointerButton",
            Options::new(),
            vec![Arg::I32(button), Arg::U32(state as u32)],
        )
        .await
    }

    /// Smooth scroll; `finish` marks the end of a scroll sequence.
    pub async fn notify_pointer_axis(&self, dx: f64, dy: f64, finish: bool) -> Result<()> {
        let mut options = Options::new();
        options.insert("finish".to_string(), OwnedValue::from(finish));
        self.notify_input(
            DeviceType::POINTER,
            "NotifyPointerAxis",
            options,
            vec![Arg::F64(dx), Arg::F64(dy)],
        )
        .await
    }

    pub async fn notify_pointer_axis_discrete(&self, axis: Axis, steps: i32) -> Result<()> {
        self.notify_input(
            DeviceType::POINTER,
            "NotifyPointerAxisDiscrete",
            Options::new(),
            vec![Arg::U32(axis as u32), Arg::I32(steps)],
        )
        .await
    }

    /// `keycode` is an evdev key code.
    pub async fn notify_keyboard_keycode(&self, keycode: i32, state: KeyState) -> Result<()> {
        self.notify_input(
            DeviceType::KEYBOARD,
            "NotifyKeyboardKeycode",
            Options::new(),
            vec![Arg::I32(keycode), Arg::U32(state as u32)],
        )
        .await
    }

    pub async fn notify_keyboard_keysym(&self, keysym: i32, state: KeyState) -> Result<()> {
        self.notify_input(
            DeviceType::KEYBOARD,
            "NotifyKeyboardKeysym",
            Options::new(),
            vec![Arg::I32(keysym), Arg::U32(state as u32)],
        )
        .await
    }

    pub async fn notify_touch_down(&self, stream: u32, slot: u32, x: f64, y: f64) -> Result<()> {
        self.notify_input(
            DeviceType::TOUCHSCREEN,
            "NotifyTouchDown",
            Options::new(),
            vec![Arg::U32(stream), Arg::U32(slot), Arg::F64(x), Arg::F64(y)],
        )
        .await
    }

    pub async fn notify_touch_motion(&self, stream: u32, slot: u32, x: f64, y: f64) -> Result<()> {
        self.notify_input(
            DeviceType::TOUCHSCREEN,
            "NotifyTouchMotion",
            Options::new(),
            vec![Arg::U32(stream), Arg::U32(slot), Arg::F64(x), Arg::F64(y)],
        )
        .await
    }

    pub async fn notify_touch_up(&self, slot: u32) -> Result<()> {
        self.notify_input(
            DeviceType::TOUCHSCREEN,
            "NotifyTouchUp",
            Options::new(),
            vec![Arg::U32(slot)],
        )
        .await
    }

    async fn notify_input(
        &self,
        device: DeviceType,
        method: &'static str,
        options: Options,
        args: Vec<Arg>,
    ) -> Result<()> {
        if self.kind != SessionKind::RemoteDesktop || self.state != SessionState::Active {
            return Err(Error::InvalidSession(format!(
                "{} is not an active remote desktop session",
                self.path
            )));
        }
        if !self.devices.contains(device) {
            return Err(Error::InvalidSession(format!(
                "{} was not granted {device:?}",
                self.path
            )));
        }

        let mut call = MethodCall::portal(REMOTE_DESKTOP_INTERFACE, method)
            .arg(Arg::Path(self.path.clone()))
            .arg(Arg::Options(options));
        call.args.extend(args);
        self.portal.bus().call(call).await
    }
}
