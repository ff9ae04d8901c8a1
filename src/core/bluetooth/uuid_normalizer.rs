//! UUID normalization
//! Canonicalizes short-form and full-form UUID strings into one upper-case
//! representation so comparisons are byte-exact.

use std::fmt;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::constants::{BLUETOOTH_BASE_UUID, FULL_UUID_LENGTH, SHORT_UUID_LENGTH};
use crate::core::bluetooth::error::BleError;

/// A UUID string after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUuid {
    value: String,
    canonical: bool,
}

impl CanonicalUuid {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// False when the input had neither the short nor the full length and was
    /// passed through as-is.
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    /// Parses the normalized string. UUID parsing is the authority on validity.
    pub fn to_uuid(&self) -> Result<Uuid, BleError> {
        Uuid::parse_str(&self.value)
            .map_err(|e| BleError::InvalidArgument(format!("UUID {}: {}", self.value, e)))
    }
}

impl fmt::Display for CanonicalUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Normalizes a UUID string.
///
/// A 4-character input is expanded into the Bluetooth base UUID. A
/// 36-character input is kept. Any other length is returned unmodified but
/// flagged as non-canonical. Output is trimmed and upper-cased.
pub fn normalize(input: &str) -> Result<CanonicalUuid, BleError> {
    let uuid = input.trim().to_uppercase();
    if uuid.is_empty() {
        return Err(BleError::InvalidArgument("empty UUID".to_string()));
    }

    match uuid.len() {
        SHORT_UUID_LENGTH => Ok(CanonicalUuid {
            value: expand_short_uuid(&uuid),
            canonical: true,
        }),
        FULL_UUID_LENGTH => Ok(CanonicalUuid {
            value: uuid,
            canonical: true,
        }),
        _ => {
            debug!("UUID {} has a non-canonical length, passing through", uuid);
            Ok(CanonicalUuid {
                value: uuid,
                canonical: false,
            })
        }
    }
}

/// Normalizes and parses in one step.
pub fn parse(input: &str) -> Result<Uuid, BleError> {
    normalize(input)?.to_uuid()
}

/// Formats a parsed UUID in the canonical upper-case form used in events.
pub fn to_canonical_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string().to_uppercase()
}

fn expand_short_uuid(short_uuid: &str) -> String {
    format!(
        "{}{}{}",
        &BLUETOOTH_BASE_UUID[..4],
        short_uuid,
        &BLUETOOTH_BASE_UUID[8..]
    )
}
