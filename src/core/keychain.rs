//! Keychain lookup for executor credentials.
//!
//! Uses the system keychain (macOS Keychain, Linux Secret Service, Windows
//! Credential Manager) under the `devrules` service.

use keyring::Entry;
use serde_json::Value;

use crate::defaults::KEYCHAIN_SERVICE;
use crate::{Error, ErrorCode, Result};

fn keyring_error(e: keyring::Error) -> Error {
    Error::new(
        ErrorCode::InternalUnexpected,
        format!("Keychain error: {}", e),
        Value::Null,
    )
}

/// Key format: `<namespace>:<name>`, e.g. `jenkins:token`.
fn entry(namespace: &str, name: &str) -> Result<Entry> {
    Entry::new(KEYCHAIN_SERVICE, &format!("{}:{}", namespace, name)).map_err(keyring_error)
}

/// Returns `None` if the key doesn't exist.
pub fn get(namespace: &str, name: &str) -> Result<Option<String>> {
    match entry(namespace, name)?.get_password() {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(keyring_error(e)),
    }
}

/// Like `get`, but a keychain that cannot be reached counts as empty.
pub fn lookup(namespace: &str, name: &str) -> Option<String> {
    get(namespace, name).ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Requires keychain access; run with `cargo test keychain -- --ignored`.
    #[test]
    #[ignore]
    fn missing_entry_is_none() {
        assert_eq!(get("devrules-test", "does-not-exist").unwrap(), None);
    }
}
