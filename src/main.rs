//! hostcert - install-time provisioning of a self-signed host certificate.
//!
//! One-shot installer step: seeds the RNG, generates an RSA key, builds and
//! self-signs an X.509 certificate for this host's (IDN-aware) name, writes
//! the PEM pair, and optionally hands the files to the agent's service
//! account. Non-fatal problems are logged and summarized; fatal ones abort
//! with a single descriptive error.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hostcert::generate_host_cert::{CertificateRequestBuilder, HostCertGenerator};
use hostcert::ownership;

/// Generate a self-signed TLS certificate for a managed-system agent
#[derive(Parser, Debug)]
#[command(name = "hostcert")]
#[command(version)]
#[command(about = "Generate a self-signed TLS certificate for a managed-system agent")]
struct Args {
    /// Where to write the PEM private key
    #[arg(long, value_name = "PATH")]
    key_out: PathBuf,

    /// Where to write the PEM certificate
    #[arg(long, value_name = "PATH")]
    cert_out: PathBuf,

    /// Host name for the certificate subject (default: the system hostname)
    #[arg(long)]
    hostname: Option<String>,

    /// Domain name for the certificate subject, possibly internationalized
    /// (default: the domain part of an FQDN system hostname)
    #[arg(long)]
    domain: Option<String>,

    /// Days from now at which the certificate becomes valid (0 = immediately)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    start_days: i32,

    /// Days from now at which the certificate expires
    #[arg(long, default_value_t = 3650)]
    end_days: i32,

    /// RSA key size in bits
    #[arg(long, default_value_t = 2048)]
    bits: u32,

    /// Issue a client-authentication certificate instead of a server one
    #[arg(long)]
    client_cert: bool,

    /// Randomness seed file carried across runs
    #[arg(long, env = "HOSTCERT_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Assign the generated files to this user account
    #[arg(long)]
    owner: Option<String>,

    /// Group for the generated files (default: the owner's primary group)
    #[arg(long)]
    group: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    let (hostname, domain) = host_identity(&args)?;

    // Resolve the target account before doing any expensive work so a bad
    // account name fails without touching the key paths.
    let owner = resolve_ownership(args.owner.as_deref(), args.group.as_deref())?;

    let request = CertificateRequestBuilder::new(&args.key_out, &args.cert_out)
        .hostname(hostname)
        .domain(domain)
        .start_days(args.start_days)
        .end_days(args.end_days)
        .key_bits(args.bits)
        .client_cert(args.client_cert)
        .build()?;

    let seed_file = args.seed_file.clone().unwrap_or_else(default_seed_file);
    let mut generator = HostCertGenerator::new(request, seed_file);
    let diagnostics = generator
        .generate_with_diagnostics()
        .context("certificate generation failed")?;

    println!("✓ Private key written to {}", args.key_out.display());
    println!("✓ Certificate written to {}", args.cert_out.display());

    if let Some((uid, gid, who)) = owner {
        ownership::set_owner(&args.key_out, uid, gid, &who)?;
        ownership::set_owner(&args.cert_out, uid, gid, &who)?;
        println!("✓ Files assigned to {}", who);
    }

    if !diagnostics.is_empty() {
        println!(
            "Completed with {} warning(s); see the log output above.",
            diagnostics.len()
        );
    }
    Ok(())
}

/// Host and domain for the subject. Explicit flags are taken verbatim; the
/// system hostname fills the gaps, split at its first dot when it is an
/// FQDN.
fn host_identity(args: &Args) -> Result<(String, String)> {
    if let (Some(host), Some(domain)) = (&args.hostname, &args.domain) {
        return Ok((host.clone(), domain.clone()));
    }

    let system = hostname::get()
        .context("failed to read the system hostname")?
        .to_string_lossy()
        .into_owned();
    let (sys_host, sys_domain) = match system.split_once('.') {
        Some((host, domain)) if !domain.is_empty() => (host.to_string(), domain.to_string()),
        _ => (system, String::new()),
    };

    Ok((
        args.hostname.clone().unwrap_or(sys_host),
        args.domain.clone().unwrap_or(sys_domain),
    ))
}

fn resolve_ownership(
    owner: Option<&str>,
    group: Option<&str>,
) -> Result<Option<(libc::uid_t, libc::gid_t, String)>> {
    let Some(user) = owner else {
        if group.is_some() {
            bail!("--group requires --owner");
        }
        return Ok(None);
    };
    let (uid, primary_gid) = ownership::resolve_user(user)?;
    let (gid, who) = match group {
        Some(name) => (ownership::resolve_group(name)?, format!("{}:{}", user, name)),
        None => (primary_gid, user.to_string()),
    };
    Ok(Some((uid, gid, who)))
}

fn default_seed_file() -> PathBuf {
    // Same place the OpenSSL command line tools keep their RNG seed.
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".rnd"),
        _ => PathBuf::from("/var/lib/hostcert/.rnd"),
    }
}
