//! Identity keys and the codec that produces them
//!
//! An [`IdentityKey`] is only ever built by [`IdentityCodec::resolve`] (or read
//! back from a store that accepted it earlier), so the rest of the crate never
//! has to re-validate identity strings.

use super::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the base64 body of a TeamSpeak-style identity (before the `=`)
const TEAMSPEAK_BODY_LEN: usize = 27;

/// Length of a Discord-style numeric identity
const DISCORD_ID_LEN: usize = 18;

/// Canonical identity of a ledger owner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Wrap a string that a backend already stored under this key
    pub(crate) fn from_trusted(value: impl Into<String>) -> Self {
        IdentityKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An external actor that can be turned into an identity
///
/// Chat clients, event payloads and test doubles implement this. The display
/// name is read lazily, so a coalesced nickname write sees the name current at
/// flush time.
pub trait ActorHandle: Send + Sync {
    /// Raw identity reference, `None` when the actor does not expose one
    fn identity(&self) -> Option<String>;

    /// Current display name
    fn display_name(&self) -> String;
}

/// Input accepted by the codec
#[derive(Clone, Copy)]
pub enum IdentityInput<'a> {
    /// A bare identity string
    Raw(&'a str),
    /// An actor exposing an identity accessor
    Handle(&'a dyn ActorHandle),
}

impl<'a> From<&'a str> for IdentityInput<'a> {
    fn from(value: &'a str) -> Self {
        IdentityInput::Raw(value)
    }
}

/// Accepted identity shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdentityFormat {
    /// 27 base64-alphabet characters followed by `=`
    #[default]
    Teamspeak,
    /// 18 decimal digits, optionally prefixed by `kind/`
    Discord,
}

/// Validates and normalizes identity inputs for one format
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec {
    format: IdentityFormat,
}

impl IdentityCodec {
    pub fn new(format: IdentityFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> IdentityFormat {
        self.format
    }

    /// Resolve a raw string or a handle into a canonical identity key
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentity` if the string does not match the configured
    /// format or the handle has no identity.
    pub fn resolve(&self, input: IdentityInput<'_>) -> LedgerResult<IdentityKey> {
        match input {
            IdentityInput::Raw(raw) => self.validate(raw),
            IdentityInput::Handle(handle) => {
                let raw = handle.identity().ok_or_else(|| {
                    LedgerError::invalid_identity("<handle>", "handle exposes no identity")
                })?;
                self.validate(&raw)
            }
        }
    }

    /// Shorthand for resolving a raw string
    pub fn resolve_str(&self, raw: &str) -> LedgerResult<IdentityKey> {
        self.resolve(IdentityInput::Raw(raw))
    }

    fn validate(&self, raw: &str) -> LedgerResult<IdentityKey> {
        match self.format {
            IdentityFormat::Teamspeak => {
                let valid = raw.is_ascii()
                    && raw.len() == TEAMSPEAK_BODY_LEN + 1
                    && raw.ends_with('=')
                    && raw[..TEAMSPEAK_BODY_LEN]
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'/' || b == b'+');
                if !valid {
                    return Err(LedgerError::invalid_identity(
                        raw,
                        "expected 27 characters of [a-z0-9/+] followed by '='",
                    ));
                }
                Ok(IdentityKey(raw.to_string()))
            }
            IdentityFormat::Discord => {
                // composite references look like "<kind>/<numeric id>"
                let numeric = match raw.split_once('/') {
                    Some((_, id)) => id,
                    None => raw,
                };
                if numeric.len() != DISCORD_ID_LEN || !numeric.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(LedgerError::invalid_identity(raw, "expected an 18 digit numeric id"));
                }
                Ok(IdentityKey(numeric.to_string()))
            }
        }
    }
}
