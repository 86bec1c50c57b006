//! hostcert - self-signed host certificate provisioning
//!
//! Generates the TLS identity a managed-system agent presents after
//! installation: an RSA private key and a self-signed X.509v3 certificate
//! whose subject carries the host and domain name, with internationalized
//! domain names converted to their ASCII-compatible encoding when a
//! conversion library is installed.
//!
//! # Overview
//!
//! One generation run walks a fixed sequence:
//!
//! ```text
//! seed RNG → generate RSA key → resolve subject → build request
//!          → self-sign → write PEM pair → save entropy seed
//! ```
//!
//! The interesting engineering sits in three places:
//!
//! - [`entropy`]: seeds the OpenSSL RNG from `/dev/random` (bounded,
//!   non-blocking), `/dev/urandom`, and a seed file carried across runs,
//!   then persists fresh seed material back. Shortfalls warn, never abort.
//! - [`idn`]: discovers `libidn.so.<N>` across library directories, ranks
//!   candidates by numeric suffix, loads the best one that exposes the
//!   conversion entry point, and guarantees the handle is released exactly
//!   once. A missing library downgrades conversion to a no-op.
//! - [`generate_host_cert`]: validates the request up front, then drives
//!   key generation, subject construction, self-signing, and atomic PEM
//!   persistence, collecting non-fatal warnings in
//!   [`diagnostics::Diagnostics`].
//!
//! Account handling for the generated files lives in [`ownership`], with
//! its own error type so installers can tell account problems from crypto
//! problems.
//!
//! # Quick Start
//!
//! ```no_run
//! use hostcert::generate_host_cert::{CertificateRequestBuilder, HostCertGenerator};
//!
//! fn main() -> Result<(), hostcert::error::SslCertError> {
//!     let request = CertificateRequestBuilder::new(
//!         "/etc/agent/ssl/host.key",
//!         "/etc/agent/ssl/host.crt",
//!     )
//!     .hostname("host1".to_string())
//!     .domain("example.com".to_string())
//!     .end_days(365)
//!     .build()?;
//!
//!     let mut generator = HostCertGenerator::new(request, "/var/lib/agent/.rnd");
//!     let diagnostics = generator.generate_with_diagnostics()?;
//!     for warning in diagnostics.entries() {
//!         eprintln!("warning: {}", warning);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Fatal conditions surface as [`error::SslCertError`]; account lookups
//! fail with [`error::UserLookupError`]. Everything recoverable (entropy
//! shortfall, missing conversion library, failed conversion, seed-file
//! write failure) is returned as diagnostics next to the successful result
//! and logged as it happens.

pub mod diagnostics;
pub mod entropy;
pub mod error;
pub mod generate_host_cert;
pub mod idn;
pub mod ownership;
