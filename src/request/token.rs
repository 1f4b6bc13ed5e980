//! Handle tokens and the object paths derived from them.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use rand::Rng;
use zbus::zvariant::OwnedObjectPath;

use crate::Result;

/// Prefix of every request object path.
pub const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request";
/// Prefix of every session object path.
pub const SESSION_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/session";

/// Derives the object path the broker will use for a request.
///
/// `sender` is the already sanitized unique name (`1_42` for `:1.42`).
pub fn request_path(sender: &str, token: &str) -> Result<OwnedObjectPath> {
    Ok(OwnedObjectPath::try_from(format!(
        "{REQUEST_PATH_PREFIX}/{sender}/{token}"
    ))?)
}

/// Derives the object path the broker will use for a session.
pub fn session_path(sender: &str, token: &str) -> Result<OwnedObjectPath> {
    Ok(OwnedObjectPath::try_from(format!(
        "{SESSION_PATH_PREFIX}/{sender}/{token}"
    ))?)
}

/// Set of tokens held by live requests of one portal.
#[derive(Clone, Default, Debug)]
pub struct TokenRegistry {
    live: Arc<Mutex<HashSet<String>>>,
}

impl TokenRegistry {
    /// Reserves a fresh `portal<N>` token, unique among live leases.
    pub fn acquire(&self) -> HandleToken {
        self.acquire_with(|| format!("portal{}", rand::thread_rng().gen_range(0..i32::MAX)))
    }

    /// Reserves a token produced by `generate`, retrying on collision.
    pub fn acquire_with(&self, mut generate: impl FnMut() -> String) -> HandleToken {
        let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let candidate = generate();
            if live.insert(candidate.clone()) {
                return HandleToken {
                    value: candidate,
                    registry: self.clone(),
                };
            }
        }
    }

    /// Number of tokens currently leased.
    pub fn live(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn release(&self, token: &str) {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token);
    }
}

/// A leased handle token; returned to the registry on drop.
#[derive(Debug)]
pub struct HandleToken {
    value: String,
    registry: TokenRegistry,
}

impl HandleToken {
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for HandleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Drop for HandleToken {
    fn drop(&mut self) {
        self.registry.release(&self.value);
    }
}
