//! Portal operations.
//!
//! Each submodule describes its operations as [`Operation`](crate::request::Operation)
//! constants and adds `start`/`finish` pairs to [`Portal`](crate::Portal).

pub mod camera;
pub mod file_chooser;
pub mod open_uri;
pub mod screencast;
pub mod screenshot;

use zbus::zvariant::{OwnedValue, Str, Value};

use crate::bus::Options;
use crate::request::Results;
use crate::{Error, Result};

/// Options map with the given boolean flags.
pub(crate) fn flags(entries: &[(&str, bool)]) -> Options {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), OwnedValue::from(*value)))
        .collect()
}

pub(crate) fn insert_str(options: &mut Options, key: &str, value: &str) {
    options.insert(
        key.to_string(),
        OwnedValue::from(Str::from(value.to_string())),
    );
}

/// Removes a required result, failing with [`Error::MissingResult`].
pub(crate) fn take(
    results: &mut Results,
    operation: &'static str,
    key: &'static str,
) -> Result<OwnedValue> {
    results
        .remove(key)
        .ok_or(Error::MissingResult { operation, key })
}

/// A required string result.
pub(crate) fn take_string(
    results: &mut Results,
    operation: &'static str,
    key: &'static str,
) -> Result<String> {
    let value = take(results, operation, key)?;
    Ok(String::try_from(value)?)
}

/// A required array of strings.
pub(crate) fn take_strings(
    results: &mut Results,
    operation: &'static str,
    key: &'static str,
) -> Result<Vec<String>> {
    let value: Value = take(results, operation, key)?.into();
    Ok(Vec::<String>::try_from(value)?)
}
