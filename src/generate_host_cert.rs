//! Self-signed host certificate generation.
//!
//! This module produces the host identity a managed-system agent presents
//! over TLS: an RSA private key and a self-signed X.509v3 certificate whose
//! subject carries the host and (IDN-resolved) domain name.
//!
//! Generation is a linear sequence with no way back:
//!
//! ```text
//! Seeded → KeyGenerated → SubjectResolved → RequestBuilt → SelfSigned → Persisted
//! ```
//!
//! Entropy loading and domain-name conversion are best-effort; their
//! failures are recorded as [`Diagnostics`] and generation continues. A
//! failure in any cryptographic step aborts the run with a single
//! [`SslCertError`], and the output paths are never left holding a key
//! without its certificate.
//!
//! # Certificate Properties
//! - **Version**: X.509v3, SHA-256 self-signature, random 128-bit serial
//! - **Subject**: one `DC` entry per ASCII domain label plus
//!   `CN=<host>.<domain>`
//! - **Server profile**: Key Usage digitalSignature + keyEncipherment
//!   (critical), Extended Key Usage serverAuth
//! - **Client profile**: Key Usage digitalSignature (critical), Extended
//!   Key Usage clientAuth
//! - **Subject Alternative Name**: DNS entry for the resolved FQDN

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Name, X509NameRef, X509Req, X509ReqBuilder, X509};

use crate::diagnostics::Diagnostics;
use crate::entropy::EntropyManager;
use crate::error::SslCertError;
use crate::idn::{self, IdnResolver, IdnSource};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const X509_REQ_VERSION_1: i32 = 0; // PKCS#10 version 1 is represented by 0
const SECONDS_PER_DAY: i64 = 86_400;

/// RSA modulus sizes accepted for the host key. Anything else fails fast at
/// request build time rather than being silently clamped.
pub const SUPPORTED_KEY_BITS: [u32; 4] = [1024, 2048, 3072, 4096];

/// Validated, immutable description of one certificate to generate.
///
/// Construct through [`CertificateRequestBuilder`]; a value of this type has
/// already passed the validity-window and key-size checks.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    key_path: PathBuf,
    cert_path: PathBuf,
    start_days: i32,
    end_days: i32,
    hostname: String,
    domain_raw: String,
    key_bits: u32,
    client_cert: bool,
}

/// Builder for [`CertificateRequest`]
///
/// # Defaults
/// - validity window: 0 to 3650 days from generation time
/// - key size: 2048-bit RSA
/// - profile: server certificate
/// - hostname and domain: empty
///
/// # Example
/// ```rust,no_run
/// # use hostcert::generate_host_cert::CertificateRequestBuilder;
/// # fn example() -> Result<(), hostcert::error::SslCertError> {
/// let request = CertificateRequestBuilder::new("/etc/agent/ssl/host.key", "/etc/agent/ssl/host.crt")
///     .hostname("host1".to_string())
///     .domain("example.com".to_string())
///     .start_days(0)
///     .end_days(365)
///     .key_bits(2048)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct CertificateRequestBuilder {
    key_path: PathBuf,
    cert_path: PathBuf,
    start_days: i32,
    end_days: i32,
    hostname: String,
    domain: String,
    key_bits: u32,
    client_cert: bool,
}

impl CertificateRequestBuilder {
    pub fn new(key_path: impl Into<PathBuf>, cert_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            cert_path: cert_path.into(),
            start_days: 0,
            end_days: 3650,
            hostname: String::new(),
            domain: String::new(),
            key_bits: 2048,
            client_cert: false,
        }
    }

    /// Days from now at which the certificate becomes valid. Zero means
    /// valid immediately; negative values backdate against clock skew.
    pub fn start_days(mut self, days: i32) -> Self {
        self.start_days = days;
        self
    }

    /// Days from now at which the certificate expires.
    pub fn end_days(mut self, days: i32) -> Self {
        self.end_days = days;
        self
    }

    /// Set the host name placed in the subject.
    pub fn hostname(mut self, hostname: String) -> Self {
        self.hostname = hostname;
        self
    }

    /// Set the domain name, possibly internationalized. Conversion to ASCII
    /// happens during generation, not here.
    pub fn domain(mut self, domain: String) -> Self {
        self.domain = domain;
        self
    }

    /// Set the RSA key size in bits. Must be one of [`SUPPORTED_KEY_BITS`].
    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Select the client-authentication extension profile instead of the
    /// server one.
    pub fn client_cert(mut self, client_cert: bool) -> Self {
        self.client_cert = client_cert;
        self
    }

    /// Validate and produce the request.
    ///
    /// # Errors
    /// - [`SslCertError::InvalidValidityWindow`] when the start offset is
    ///   not earlier than the end offset
    /// - [`SslCertError::UnsupportedKeyBits`] for a key size outside
    ///   [`SUPPORTED_KEY_BITS`]
    pub fn build(self) -> Result<CertificateRequest, SslCertError> {
        if self.start_days >= self.end_days {
            return Err(SslCertError::InvalidValidityWindow {
                start: self.start_days,
                end: self.end_days,
            });
        }
        if !SUPPORTED_KEY_BITS.contains(&self.key_bits) {
            return Err(SslCertError::UnsupportedKeyBits(self.key_bits));
        }
        Ok(CertificateRequest {
            key_path: self.key_path,
            cert_path: self.cert_path,
            start_days: self.start_days,
            end_days: self.end_days,
            hostname: self.hostname,
            domain_raw: self.domain,
            key_bits: self.key_bits,
            client_cert: self.client_cert,
        })
    }
}

/// Drives one certificate generation run from entropy seeding through
/// persisted PEM outputs.
pub struct HostCertGenerator {
    request: CertificateRequest,
    entropy: EntropyManager,
    idn: Box<dyn IdnSource>,
}

impl HostCertGenerator {
    /// Generator with the production entropy sources and the default IDN
    /// library search directories.
    pub fn new(request: CertificateRequest, seed_file: impl Into<PathBuf>) -> Self {
        Self::with_parts(
            request,
            EntropyManager::new(seed_file),
            Box::new(IdnResolver::new()),
        )
    }

    /// Generator over explicit collaborators.
    pub fn with_parts(
        request: CertificateRequest,
        entropy: EntropyManager,
        idn: Box<dyn IdnSource>,
    ) -> Self {
        Self {
            request,
            entropy,
            idn,
        }
    }

    /// Generate key and certificate, discarding the collected warnings.
    /// They still reach the log as they happen.
    pub fn generate(&mut self) -> Result<(), SslCertError> {
        self.generate_with_diagnostics().map(|_| ())
    }

    /// Generate key and certificate, returning the non-fatal warnings
    /// collected along the way.
    pub fn generate_with_diagnostics(&mut self) -> Result<Diagnostics, SslCertError> {
        let mut diag = Diagnostics::new();
        self.entropy.load(&mut diag);

        let bits = self.request.key_bits;
        let key = generate_key(bits).map_err(|source| SslCertError::KeyGeneration { bits, source })?;

        let domain = self.resolve_domain(&mut diag);
        let (subject, fqdn) = host_subject(&self.request.hostname, &domain)
            .map_err(|source| SslCertError::RequestBuild { source })?;

        let req =
            build_request(&subject, &key).map_err(|source| SslCertError::RequestBuild { source })?;

        let cert = self
            .self_sign(&req, &key, &fqdn)
            .map_err(|source| SslCertError::Signing { source })?;

        self.persist(&key, &cert)?;
        self.entropy.save(&mut diag);

        tracing::info!(
            subject = %fqdn,
            cert = %self.request.cert_path.display(),
            "generated self-signed host certificate"
        );
        Ok(diag)
    }

    /// Best-effort ASCII form of the configured domain name. Every failure
    /// mode falls back to the raw text with a recorded warning; an empty
    /// domain skips conversion entirely.
    fn resolve_domain(&self, diag: &mut Diagnostics) -> String {
        let raw = self.request.domain_raw.trim();
        if raw.is_empty() {
            return String::new();
        }
        let Some(converter) = self.idn.load() else {
            diag.warn(format!(
                "No usable IDN conversion library was found; using domain name \"{}\" as is.",
                idn::printable_ascii(raw)
            ));
            return raw.to_string();
        };
        match converter.to_ascii(raw) {
            Ok(ascii) => ascii,
            Err(e) => {
                diag.warn(format!(
                    "IDN conversion of domain name \"{}\" failed ({}); using it as is.",
                    idn::printable_ascii(raw),
                    e
                ));
                raw.to_string()
            }
        }
    }

    fn self_sign(
        &self,
        req: &X509Req,
        key: &PKey<Private>,
        fqdn: &str,
    ) -> Result<X509, ErrorStack> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        // Random 128-bit serial; self-signed certs have no issuing
        // authority to allocate one.
        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        let serial_number = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial_number)?;

        builder.set_subject_name(req.subject_name())?;
        builder.set_issuer_name(req.subject_name())?;
        builder.set_pubkey(key)?;

        let now = unix_now();
        let not_before =
            Asn1Time::from_unix(now + i64::from(self.request.start_days) * SECONDS_PER_DAY)?;
        builder.set_not_before(&not_before)?;
        let not_after =
            Asn1Time::from_unix(now + i64::from(self.request.end_days) * SECONDS_PER_DAY)?;
        builder.set_not_after(&not_after)?;

        // End-entity certificate, never a CA.
        let bc = BasicConstraints::new().critical().build()?;
        builder.append_extension(bc)?;

        let ku = if self.request.client_cert {
            KeyUsage::new().critical().digital_signature().build()?
        } else {
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?
        };
        builder.append_extension(ku)?;

        let eku = if self.request.client_cert {
            ExtendedKeyUsage::new().client_auth().build()?
        } else {
            ExtendedKeyUsage::new().server_auth().build()?
        };
        builder.append_extension(eku)?;

        let san = SubjectAlternativeName::new()
            .dns(fqdn)
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(san)?;

        builder.sign(key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// Write the PEM pair, key first. If the certificate cannot be written
    /// the key is removed again so the paths never hold half of a pair.
    fn persist(&self, key: &PKey<Private>, cert: &X509) -> Result<(), SslCertError> {
        key.private_key_to_pem_pkcs8()
            .map_err(io::Error::other)
            .and_then(|pem| write_pem(&self.request.key_path, &pem, 0o600))
            .map_err(|source| SslCertError::WriteOutput {
                what: "private key",
                path: self.request.key_path.clone(),
                source,
            })?;

        if let Err(source) = cert
            .to_pem()
            .map_err(io::Error::other)
            .and_then(|pem| write_pem(&self.request.cert_path, &pem, 0o644))
        {
            let _ = fs::remove_file(&self.request.key_path);
            return Err(SslCertError::WriteOutput {
                what: "certificate",
                path: self.request.cert_path.clone(),
                source,
            });
        }
        Ok(())
    }
}

fn generate_key(bits: u32) -> Result<PKey<Private>, ErrorStack> {
    let rsa = Rsa::generate(bits)?;
    PKey::from_rsa(rsa)
}

/// Subject distinguished name plus the FQDN it spells: one `DC` entry per
/// ASCII domain label in order, then `CN = <hostname>.<domain>` (bare
/// hostname when there is no domain).
fn host_subject(hostname: &str, domain: &str) -> Result<(X509Name, String), ErrorStack> {
    let fqdn = if domain.is_empty() {
        hostname.to_string()
    } else {
        format!("{}.{}", hostname, domain)
    };
    let mut name = X509Name::builder()?;
    // domainComponent is IA5String, so a label the conversion fallback left
    // non-ASCII lives in the UTF8-capable CN only.
    for label in domain
        .split('.')
        .filter(|label| !label.is_empty() && label.is_ascii())
    {
        name.append_entry_by_nid(Nid::DOMAINCOMPONENT, label)?;
    }
    name.append_entry_by_nid(Nid::COMMONNAME, &fqdn)?;
    Ok((name.build(), fqdn))
}

/// Certificate request carrying subject and public key, signed with the
/// private key as proof of possession.
fn build_request(subject: &X509NameRef, key: &PKey<Private>) -> Result<X509Req, ErrorStack> {
    let mut builder = X509ReqBuilder::new()?;
    builder.set_version(X509_REQ_VERSION_1)?;
    builder.set_subject_name(subject)?;
    builder.set_pubkey(key)?;
    builder.sign(key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Stage to a sibling temp file, then rename over the target, so a crash
/// mid-write never leaves a partial PEM at the destination.
fn write_pem(path: &Path, pem: &[u8], mode: u32) -> io::Result<()> {
    let tmp = tmp_sibling(path);
    let result = write_exact(&tmp, pem, mode).and_then(|_| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_exact(path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(bytes)?;
    // mode() at open time is subject to the umask; pin the exact bits.
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    file.sync_all()
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn unix_now() -> i64 {
    // Same clock the OpenSSL time helpers read.
    unsafe { libc::time(std::ptr::null_mut()) as i64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idn::IdnConverter;
    use tempfile::TempDir;

    struct NoConversion;

    impl IdnSource for NoConversion {
        fn load(&self) -> Option<Box<dyn IdnConverter>> {
            None
        }
    }

    fn request_in(dir: &TempDir) -> CertificateRequestBuilder {
        CertificateRequestBuilder::new(dir.path().join("host.key"), dir.path().join("host.crt"))
    }

    #[test]
    fn test_builder_defaults_pass_validation() {
        let dir = TempDir::new().unwrap();
        let request = request_in(&dir).build().unwrap();
        assert_eq!(request.key_bits, 2048);
        assert_eq!(request.start_days, 0);
        assert_eq!(request.end_days, 3650);
        assert!(!request.client_cert);
    }

    #[test]
    fn test_builder_rejects_window_that_never_opens() {
        let dir = TempDir::new().unwrap();
        match request_in(&dir).start_days(10).end_days(10).build() {
            Err(SslCertError::InvalidValidityWindow { start: 10, end: 10 }) => {}
            other => panic!("expected InvalidValidityWindow, got {:?}", other.map(|_| ())),
        }
        assert!(request_in(&dir).start_days(365).end_days(0).build().is_err());
    }

    #[test]
    fn test_builder_rejects_unsupported_key_size() {
        let dir = TempDir::new().unwrap();
        match request_in(&dir).key_bits(1536).build() {
            Err(SslCertError::UnsupportedKeyBits(1536)) => {}
            other => panic!("expected UnsupportedKeyBits, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_host_subject_builds_dc_entries_and_fqdn_cn() {
        let (name, fqdn) = host_subject("host1", "example.com").unwrap();
        assert_eq!(fqdn, "host1.example.com");

        let dcs: Vec<String> = name
            .entries_by_nid(Nid::DOMAINCOMPONENT)
            .map(|e| e.data().as_utf8().unwrap().to_string())
            .collect();
        assert_eq!(dcs, ["example", "com"]);

        let cn = name
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "host1.example.com");
    }

    #[test]
    fn test_host_subject_without_domain_is_bare_hostname() {
        let (name, fqdn) = host_subject("host1", "").unwrap();
        assert_eq!(fqdn, "host1");
        assert_eq!(name.entries_by_nid(Nid::DOMAINCOMPONENT).count(), 0);
    }

    #[test]
    fn test_host_subject_keeps_non_ascii_labels_out_of_dc() {
        // An unconverted domain still builds a subject; the raw label is
        // carried by the CN, never by an IA5String DC entry.
        let (name, fqdn) = host_subject("host1", "bücher.example").unwrap();
        assert_eq!(fqdn, "host1.bücher.example");

        let dcs: Vec<String> = name
            .entries_by_nid(Nid::DOMAINCOMPONENT)
            .map(|e| e.data().as_utf8().unwrap().to_string())
            .collect();
        assert_eq!(dcs, ["example"]);

        let cn = name
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "host1.bücher.example");
    }

    #[test]
    fn test_resolve_domain_without_library_warns_and_keeps_raw() {
        let dir = TempDir::new().unwrap();
        let request = request_in(&dir).domain("example.com".to_string()).build().unwrap();
        let entropy =
            EntropyManager::with_devices(dir.path().join("seed"), "/dev/null", "/dev/null");
        let generator = HostCertGenerator::with_parts(request, entropy, Box::new(NoConversion));

        let mut diag = Diagnostics::new();
        assert_eq!(generator.resolve_domain(&mut diag), "example.com");
        assert_eq!(diag.len(), 1);
        assert!(diag.entries()[0].contains("IDN conversion library"));
    }

    #[test]
    fn test_resolve_domain_skips_conversion_for_empty_domain() {
        let dir = TempDir::new().unwrap();
        let request = request_in(&dir).build().unwrap();
        let entropy =
            EntropyManager::with_devices(dir.path().join("seed"), "/dev/null", "/dev/null");
        let generator = HostCertGenerator::with_parts(request, entropy, Box::new(NoConversion));

        let mut diag = Diagnostics::new();
        assert_eq!(generator.resolve_domain(&mut diag), "");
        assert!(diag.is_empty());
    }

    #[test]
    fn test_tmp_sibling_stays_in_the_target_directory() {
        assert_eq!(
            tmp_sibling(Path::new("/etc/agent/ssl/host.key")),
            Path::new("/etc/agent/ssl/host.key.tmp")
        );
    }
}
