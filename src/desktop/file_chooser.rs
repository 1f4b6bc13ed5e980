//! File selection through `org.freedesktop.portal.FileChooser`.

use tokio_util::sync::CancellationToken;

use crate::bus::{Arg, PortalBus};
use crate::desktop::{flags, insert_str, take_strings};
use crate::parent::Parent;
use crate::request::{Operation, OperationTag, RequestHandle, RequestResult, Results};
use crate::{Portal, Result};

pub const FILE_CHOOSER_INTERFACE: &str = "org.freedesktop.portal.FileChooser";

pub const OPEN_FILE: Operation<Vec<String>> = Operation {
    tag: OperationTag::new("file_chooser.open_file"),
    interface: FILE_CHOOSER_INTERFACE,
    method: "OpenFile",
    description: "File selection",
    decode: decode_open,
};

pub const SAVE_FILE: Operation<Vec<String>> = Operation {
    tag: OperationTag::new("file_chooser.save_file"),
    interface: FILE_CHOOSER_INTERFACE,
    method: "SaveFile",
    description: "Save location selection",
    decode: decode_save,
};

fn decode_open(mut results: Results) -> Result<Vec<String>> {
    take_strings(&mut results, OPEN_FILE.description, "uris")
}

fn decode_save(mut results: Results) -> Result<Vec<String>> {
    take_strings(&mut results, SAVE_FILE.description, "uris")
}

impl<B: PortalBus> Portal<B> {
    /// Asks the user to pick one file, or several with `multiple`. Resolves
    /// to the selected uris.
    pub fn open_file(
        &self,
        parent: Option<Parent>,
        title: &str,
        multiple: bool,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        let title = title.to_string();
        self.start(
            &OPEN_FILE,
            move |parent_window| {
                vec![
                    Arg::Str(parent_window.to_string()),
                    Arg::Str(title),
                    Arg::Options(flags(&[("modal", true), ("multiple", multiple)])),
                ]
            },
            parent,
            cancellable,
        )
    }

    pub fn open_file_finish(&self, result: RequestResult) -> Result<Vec<String>> {
        OPEN_FILE.finish(result)
    }

    /// Asks the user where to save a file, suggesting `current_name`.
    pub fn save_file(
        &self,
        parent: Option<Parent>,
        title: &str,
        current_name: Option<&str>,
        cancellable: Option<CancellationToken>,
    ) -> RequestHandle {
        let title = title.to_string();
        let mut options = flags(&[("modal", true)]);
        if let Some(name) = current_name {
            insert_str(&mut options, "current_name", name);
        }

        self.start(
            &SAVE_FILE,
            move |parent_window| {
                vec![
                    Arg::Str(parent_window.to_string()),
                    Arg::Str(title),
                    Arg::Options(options),
                ]
            },
            parent,
            cancellable,
        )
    }

    pub fn save_file_finish(&self, result: RequestResult) -> Result<Vec<String>> {
        SAVE_FILE.finish(result)
    }
}
