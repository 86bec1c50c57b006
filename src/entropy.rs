//! Entropy acquisition and persistence for key generation.
//!
//! Key generation wants the RNG seeded with material the process did not
//! start with. Sources are tried in quality order: the hardware random
//! device, the pseudo-random device, and finally a seed file carried across
//! runs. Every byte read is fed to the OpenSSL RNG; after generation the
//! seed file is rewritten with fresh RNG output so the next run does not
//! start cold.
//!
//! Falling short of the minimum is a warning, not a failure. OpenSSL pools
//! its own entropy underneath, so generation proceeds either way.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::diagnostics::Diagnostics;

/// Bytes to accumulate across sources before stopping early.
pub const ENTROPY_TARGET_BYTES: usize = 1024;
/// Collecting less than this emits a shortfall warning.
pub const ENTROPY_MIN_BYTES: usize = 256;

const DEV_RANDOM: &str = "/dev/random";
const DEV_URANDOM: &str = "/dev/urandom";
const SEED_SAVE_BYTES: usize = 256;

/// Seeds the OpenSSL RNG from the best available sources and persists seed
/// material back to a user file.
#[derive(Debug)]
pub struct EntropyManager {
    seed_file: PathBuf,
    random_device: PathBuf,
    urandom_device: PathBuf,
    loaded: usize,
}

impl EntropyManager {
    pub fn new(seed_file: impl Into<PathBuf>) -> Self {
        Self::with_devices(seed_file, DEV_RANDOM, DEV_URANDOM)
    }

    /// Override the device paths. The production defaults are `/dev/random`
    /// and `/dev/urandom`.
    pub fn with_devices(
        seed_file: impl Into<PathBuf>,
        random_device: impl Into<PathBuf>,
        urandom_device: impl Into<PathBuf>,
    ) -> Self {
        Self {
            seed_file: seed_file.into(),
            random_device: random_device.into(),
            urandom_device: urandom_device.into(),
            loaded: 0,
        }
    }

    /// One pass over the source chain, feeding each chunk to the RNG until
    /// the target is reached or every source is exhausted. Returns the byte
    /// count collected; below [`ENTROPY_MIN_BYTES`] a shortfall warning is
    /// recorded and generation is expected to proceed anyway.
    pub fn load(&mut self, diag: &mut Diagnostics) -> usize {
        let sources = [&self.random_device, &self.urandom_device, &self.seed_file];
        let mut total = 0usize;
        for path in sources {
            if total >= ENTROPY_TARGET_BYTES {
                break;
            }
            match read_bounded(path, ENTROPY_TARGET_BYTES - total) {
                Ok(chunk) => {
                    let fed = seed_rng(&chunk);
                    if fed > 0 {
                        tracing::debug!(source = %path.display(), bytes = fed, "seeded RNG");
                    }
                    total += fed;
                }
                Err(e) => {
                    tracing::debug!(source = %path.display(), error = %e, "randomness source unavailable");
                }
            }
        }
        if total < ENTROPY_MIN_BYTES {
            diag.warn(format!(
                "Collected only {} of the {} random bytes wanted for key generation. \
                 The certificate will still be generated; seed {} with random data to improve future runs.",
                total,
                ENTROPY_TARGET_BYTES,
                self.seed_file.display()
            ));
        }
        self.loaded = total;
        total
    }

    /// Rewrite the seed file with fresh RNG output so randomness carries
    /// over to the next run. The certificate already exists when this runs,
    /// so a write failure is only a diagnostic.
    pub fn save(&self, diag: &mut Diagnostics) {
        if let Err(e) = self.write_seed_file() {
            diag.warn(format!(
                "Could not update the randomness seed file {}: {}",
                self.seed_file.display(),
                e
            ));
        }
    }

    pub fn loaded_bytes(&self) -> usize {
        self.loaded
    }

    fn write_seed_file(&self) -> io::Result<()> {
        let mut fresh = [0u8; SEED_SAVE_BYTES];
        openssl::rand::rand_bytes(&mut fresh).map_err(io::Error::other)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.seed_file)?;
        file.write_all(&fresh)
    }
}

/// Reads up to `max` bytes from `path` without ever blocking on a starved
/// device. Used for the devices and the seed file alike.
fn read_bounded(path: &Path, max: usize) -> io::Result<Vec<u8>> {
    let mut file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    let mut buf = vec![0u8; max];
    let mut filled = 0;
    while filled < max {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Full-credit RNG seeding: `RAND_add` with the entropy estimate equal to
/// the byte count, which is the `RAND_seed` contract. The safe
/// `openssl::rand` API only exposes extraction, so this goes through
/// `openssl-sys`.
fn seed_rng(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    unsafe {
        openssl_sys::RAND_add(
            bytes.as_ptr().cast(),
            bytes.len() as libc::c_int,
            bytes.len() as libc::c_double,
        );
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_load_reaches_target_from_urandom() {
        let dir = TempDir::new().unwrap();
        let mut manager =
            EntropyManager::with_devices(dir.path().join("seed"), DEV_URANDOM, DEV_URANDOM);
        let mut diag = Diagnostics::new();

        let total = manager.load(&mut diag);

        assert_eq!(total, ENTROPY_TARGET_BYTES);
        assert_eq!(manager.loaded_bytes(), ENTROPY_TARGET_BYTES);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_starved_sources_warn_but_return() {
        let dir = TempDir::new().unwrap();
        let mut manager =
            EntropyManager::with_devices(dir.path().join("seed"), "/dev/null", "/dev/null");
        let mut diag = Diagnostics::new();

        let total = manager.load(&mut diag);

        assert_eq!(total, 0);
        assert_eq!(diag.len(), 1);
        assert!(diag.entries()[0].contains("random bytes"));
    }

    #[test]
    fn test_seed_file_contributes_when_devices_are_starved() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        std::fs::write(&seed, vec![0x5au8; 512]).unwrap();
        let mut manager = EntropyManager::with_devices(&seed, "/dev/null", "/dev/null");
        let mut diag = Diagnostics::new();

        let total = manager.load(&mut diag);

        // 512 bytes is under the target but over the warning threshold.
        assert_eq!(total, 512);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_save_writes_fresh_seed_with_owner_only_mode() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        let manager = EntropyManager::with_devices(&seed, "/dev/null", "/dev/null");
        let mut diag = Diagnostics::new();

        manager.save(&mut diag);

        assert!(diag.is_empty());
        let meta = std::fs::metadata(&seed).unwrap();
        assert_eq!(meta.len() as usize, SEED_SAVE_BYTES);
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_save_failure_is_a_diagnostic_not_an_error() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("missing").join("seed");
        let manager = EntropyManager::with_devices(&seed, "/dev/null", "/dev/null");
        let mut diag = Diagnostics::new();

        manager.save(&mut diag);

        assert_eq!(diag.len(), 1);
        assert!(diag.entries()[0].contains("seed file"));
    }

    #[test]
    fn test_read_bounded_caps_at_max() {
        let chunk = read_bounded(Path::new(DEV_URANDOM), 64).unwrap();
        assert_eq!(chunk.len(), 64);
    }

    #[test]
    fn test_seed_rng_reports_bytes_fed() {
        assert_eq!(seed_rng(&[]), 0);
        assert_eq!(seed_rng(&[0x42; 32]), 32);
    }
}
