//! Camera access through `org.freedesktop.portal.Camera`.
//!
//! Access is granted per application; once granted, the camera nodes are
//! reachable through a PipeWire remote opened with
//! [`Portal::open_pipewire_remote_for_camera`].

use std::os::fd::OwnedFd;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{Arg, MethodCall, Options, PortalBus};
use crate::parent::Parent;
use crate::request::{Operation, OperationTag, RequestHandle, RequestResult, Results};
use crate::{Portal, Result};

pub const CAMERA_INTERFACE: &str = "org.freedesktop.portal.Camera";

pub const ACCESS_CAMERA: Operation<bool> = Operation {
    tag: OperationTag::new("camera.access_camera"),
    interface: CAMERA_INTERFACE,
    method: "AccessCamera",
    description: "Camera access",
    decode: decode_access,
};

fn decode_access(_results: Results) -> Result<bool> {
    Ok(true)
}

impl<B: PortalBus> Portal<B> {
    /// Whether the system has any camera. Errors are logged and reported as
    /// `false`.
    pub async fn is_camera_present(&self) -> bool {
        let value = match self.property(CAMERA_INTERFACE, "IsCameraPresent").await {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "Failed to get IsCameraPresent property");
                return false;
            }
        };

        bool::try_from(&value).unwrap_or_else(|err| {
            warn!(%err, "IsCameraPresent is not a boolean");
            false
        })
    }

    /// Requests access to the camera.
    pub fn access_camera(
        &self,
        parent: Option<Parent>,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        self.start(
            &ACCESS_CAMERA,
            |_parent_window| vec![Arg::Options(Options::new())],
            parent,
            cancellable,
        )
    }

    /// `true` once access is granted; [`Error::Cancelled`](crate::Error::Cancelled)
    /// if the user denied it.
    pub fn access_camera_finish(&self, result: RequestResult) -> Result<bool> {
        ACCESS_CAMERA.finish(result)
    }

    /// Opens a PipeWire remote exposing only the camera nodes.
    ///
    /// Returns `None` if the broker refuses; the reason is logged.
    pub async fn open_pipewire_remote_for_camera(&self) -> Option<OwnedFd> {
        self.call_with_fd(
            MethodCall::portal(CAMERA_INTERFACE, "OpenPipeWireRemote")
                .arg(Arg::Options(Options::new())),
        )
        .await
    }
}
