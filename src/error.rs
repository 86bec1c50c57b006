//! Error taxonomy for certificate provisioning.
//!
//! Fatal conditions abort generation and surface as [`SslCertError`]. Account
//! lookup failures keep their own type, [`UserLookupError`], so callers can
//! present account-setup guidance instead of crypto guidance. Non-fatal
//! conditions never appear here; they accumulate in
//! [`crate::diagnostics::Diagnostics`] alongside a successful result.

use std::io;
use std::path::PathBuf;

use openssl::error::ErrorStack;
use thiserror::Error;

/// Fatal certificate generation errors.
#[derive(Debug, Error)]
pub enum SslCertError {
    #[error("validity start offset {start} days must be earlier than end offset {end} days")]
    InvalidValidityWindow { start: i32, end: i32 },

    #[error("unsupported RSA key size {0} bits")]
    UnsupportedKeyBits(u32),

    #[error("failed to generate {bits}-bit RSA key: {source}")]
    KeyGeneration {
        bits: u32,
        #[source]
        source: ErrorStack,
    },

    #[error("failed to build certificate request: {source}")]
    RequestBuild {
        #[source]
        source: ErrorStack,
    },

    #[error("failed to self-sign certificate: {source}")]
    Signing {
        #[source]
        source: ErrorStack,
    },

    #[error("failed to write {what} to {}: {source}", path.display())]
    WriteOutput {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    UserLookup(#[from] UserLookupError),
}

/// A system user or group operation failed for the named identity.
///
/// Carries the failing call, the identity handed to it, and the underlying
/// OS error so installers can explain what account setup is missing.
#[derive(Debug, Error)]
#[error("calling {call}() with name \"{name}\" failed: {source}")]
pub struct UserLookupError {
    pub call: &'static str,
    pub name: String,
    #[source]
    pub source: io::Error,
}

impl UserLookupError {
    /// OS error code from the failing call, when one was reported.
    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_lookup_wraps_into_the_fatal_taxonomy() {
        let lookup = UserLookupError {
            call: "getpwnam_r",
            name: "agent".to_string(),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        let err = SslCertError::from(lookup);

        assert!(matches!(err, SslCertError::UserLookup(_)));
        // Transparent wrapping: the account text and the OS error chain
        // survive unchanged.
        let text = err.to_string();
        assert!(text.contains("getpwnam_r"));
        assert!(text.contains("agent"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
