//! Opening uris in the user's preferred application.

use tokio_util::sync::CancellationToken;

use crate::bus::{Arg, Options, PortalBus};
use crate::parent::Parent;
use crate::request::{Operation, OperationTag, RequestHandle, RequestResult, Results};
use crate::{Portal, Result};

pub const OPEN_URI_INTERFACE: &str = "org.freedesktop.portal.OpenURI";

pub const OPEN_URI: Operation<()> = Operation {
    tag: OperationTag::new("open_uri.open_uri"),
    interface: OPEN_URI_INTERFACE,
    method: "OpenURI",
    description: "Opening uri",
    decode: decode_open_uri,
};

fn decode_open_uri(_results: Results) -> Result<()> {
    Ok(())
}

impl<B: PortalBus> Portal<B> {
    pub fn open_uri(
        &self,
        parent: Option<Parent>,
        uri: &str,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        let uri = uri.to_string();
        self.start(
            &OPEN_URI,
            move |parent_window| {
                vec![
                    Arg::Str(parent_window.to_string()),
                    Arg::Str(uri),
                    Arg::Options(Options::new()),
                ]
            },
            parent,
            cancellable,
        )
    }

    pub fn open_uri_finish(&self, result: RequestResult) -> Result<()> {
        OPEN_URI.finish(result)
    }
}
