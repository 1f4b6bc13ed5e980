//! Screenshots and color picking through `org.freedesktop.portal.Screenshot`.

use tokio_util::sync::CancellationToken;
use zbus::zvariant::Value;

use crate::bus::{Arg, PortalBus};
use crate::desktop::{flags, take, take_string};
use crate::parent::Parent;
use crate::request::{Operation, OperationTag, RequestHandle, RequestResult, Results};
use crate::{Portal, Result};

pub const SCREENSHOT_INTERFACE: &str = "org.freedesktop.portal.Screenshot";

pub const SCREENSHOT: Operation<String> = Operation {
    tag: OperationTag::new("screenshot.screenshot"),
    interface: SCREENSHOT_INTERFACE,
    method: "Screenshot",
    description: "Screenshot",
    decode: decode_screenshot,
};

pub const PICK_COLOR: Operation<Color> = Operation {
    tag: OperationTag::new("screenshot.pick_color"),
    interface: SCREENSHOT_INTERFACE,
    method: "PickColor",
    description: "Color picking",
    decode: decode_color,
};

/// An sRGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

fn decode_screenshot(mut results: Results) -> Result<String> {
    take_string(&mut results, SCREENSHOT.description, "uri")
}

fn decode_color(mut results: Results) -> Result<Color> {
    let value: Value = take(&mut results, PICK_COLOR.description, "color")?.into();
    let (red, green, blue) = <(f64, f64, f64)>::try_from(value)?;
    Ok(Color { red, green, blue })
}

impl<B: PortalBus> Portal<B> {
    /// Takes a screenshot; `interactive` lets the user pick the area first.
    /// Resolves to the uri of the image.
    pub fn take_screenshot(
        &self,
        parent: Option<Parent>,
        interactive: bool,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        self.start(
            &SCREENSHOT,
            move |parent_window| {
                vec![
                    Arg::Str(parent_window.to_string()),
                    Arg::Options(flags(&[("modal", true), ("interactive", interactive)])),
                ]
            },
            parent,
            cancellable,
        )
    }

    pub fn take_screenshot_finish(&self, result: RequestResult) -> Result<String> {
        SCREENSHOT.finish(result)
    }

    /// Lets the user pick a color from the screen.
    pub fn pick_color(
        &self,
        parent: Option<Parent>,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        self.start(
            &PICK_COLOR,
            |parent_window| {
                vec![
                    Arg::Str(parent_window.to_string()),
                    Arg::Options(Default::default()),
                ]
            },
            parent,
            cancellable,
        )
    }

    pub fn pick_color_finish(&self, result: RequestResult) -> Result<Color> {
        PICK_COLOR.finish(result)
    }
}
