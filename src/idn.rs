//! Discovery and invocation of the optional IDN conversion library.
//!
//! Internationalized domain names have to be converted to their
//! ASCII-compatible encoding before they can go into a certificate subject.
//! The conversion lives in GNU libidn, which may or may not be installed and
//! may be installed several times with different version suffixes
//! (`libidn.so.12`, `libidn.so.11`, ...). This module scans a fixed set of
//! directories for candidates, ranks them by numeric suffix, loads the
//! highest version that actually exposes the conversion entry point, and
//! treats "no usable library" as a normal fallback rather than an error.
//!
//! The loaded handle is owned by [`IdnLibrary`] and closed exactly once when
//! it drops, on every exit path.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::fs;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

/// Library base name the version suffix is appended to.
pub const IDN_LIBRARY_BASE: &str = "libidn.so";
/// Conversion entry point resolved from the library.
pub const IDN_ENTRY_POINT: &[u8] = b"idna_to_ascii_lz\0";

const IDNA_SUCCESS: c_int = 0;
const DEFAULT_LIBRARY_DIRS: [&str; 5] =
    ["/usr/lib64", "/usr/lib", "/lib64", "/lib", "/usr/local/lib"];

/// `int idna_to_ascii_lz(const char *input, char **output, int flags)`.
/// The output string is malloc-allocated by the library.
type IdnaToAsciiFn = unsafe extern "C" fn(*const c_char, *mut *mut c_char, c_int) -> c_int;

/// The conversion entry point reported a failure.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("conversion entry point returned status {0}")]
    Status(c_int),

    #[error("domain name contains an embedded NUL byte")]
    EmbeddedNul,
}

/// Domain-name-to-ASCII conversion capability.
pub trait IdnConverter {
    fn to_ascii(&self, raw: &str) -> Result<String, ConversionError>;
}

/// Supplies a converter when one is available. Absence is a normal state
/// every call site handles by falling back to the raw domain name.
pub trait IdnSource {
    fn load(&self) -> Option<Box<dyn IdnConverter>>;
}

/// One discovered library file with its parsed version suffix.
///
/// Ordering is by descending version so the first candidate iterated is the
/// one to try first; ties order by file name, then full path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCandidate {
    path: PathBuf,
    version: u32,
}

impl LibraryCandidate {
    /// Parses `<base>.<integer>` file names. Anything else, including names
    /// with a non-numeric or multi-part suffix, is not a candidate.
    fn from_path(path: &Path, base: &str) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let suffix = name.strip_prefix(base)?.strip_prefix('.')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let version = suffix.parse().ok()?;
        Some(Self {
            path: path.to_path_buf(),
            version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Ord for LibraryCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .version
            .cmp(&self.version)
            .then_with(|| self.path.file_name().cmp(&other.path.file_name()))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for LibraryCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Scans candidate directories and loads the best usable conversion library.
#[derive(Debug, Clone)]
pub struct IdnResolver {
    directories: Vec<PathBuf>,
    base_name: String,
}

impl IdnResolver {
    pub fn new() -> Self {
        Self::with_directories(DEFAULT_LIBRARY_DIRS.iter().map(PathBuf::from).collect())
    }

    pub fn with_directories(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            base_name: IDN_LIBRARY_BASE.to_string(),
        }
    }

    /// Collect every `libidn.so.<N>` across the configured directories,
    /// ranked highest version first. Unreadable directories are skipped.
    pub fn discover(&self) -> BTreeSet<LibraryCandidate> {
        let mut candidates = BTreeSet::new();
        for dir in &self.directories {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                if let Some(candidate) = LibraryCandidate::from_path(&entry.path(), &self.base_name)
                {
                    candidates.insert(candidate);
                }
            }
        }
        candidates
    }

    /// Try candidates highest version first. A candidate that fails to load
    /// or lacks the entry point releases its handle and falls through to the
    /// next. `None` means conversion becomes a no-op fallback.
    pub fn resolve(&self) -> Option<IdnLibrary> {
        for candidate in self.discover() {
            match IdnLibrary::open(candidate.path()) {
                Ok(library) => {
                    tracing::debug!(path = %candidate.path().display(), "loaded IDN conversion library");
                    return Some(library);
                }
                Err(e) => {
                    tracing::debug!(path = %candidate.path().display(), error = %e, "skipping conversion library candidate");
                }
            }
        }
        None
    }
}

impl IdnSource for IdnResolver {
    fn load(&self) -> Option<Box<dyn IdnConverter>> {
        self.resolve()
            .map(|library| Box::new(library) as Box<dyn IdnConverter>)
    }
}

/// An open conversion library plus its resolved entry point.
///
/// Owning the [`Library`] is the release discipline: dropping this value
/// closes the handle exactly once whether conversion succeeded, failed, or
/// was never invoked.
pub struct IdnLibrary {
    convert: IdnaToAsciiFn,
    _library: Library,
}

impl IdnLibrary {
    fn open(path: &Path) -> Result<Self, libloading::Error> {
        let library = unsafe { Library::new(path) }?;
        let convert = {
            let symbol = unsafe { library.get::<IdnaToAsciiFn>(IDN_ENTRY_POINT) }?;
            *symbol
        };
        Ok(Self {
            convert,
            _library: library,
        })
    }
}

impl IdnConverter for IdnLibrary {
    fn to_ascii(&self, raw: &str) -> Result<String, ConversionError> {
        let input = CString::new(raw).map_err(|_| ConversionError::EmbeddedNul)?;
        let mut output: *mut c_char = std::ptr::null_mut();
        let status = unsafe { (self.convert)(input.as_ptr(), &mut output, 0) };
        if status != IDNA_SUCCESS || output.is_null() {
            return Err(ConversionError::Status(status));
        }
        // Copy out, then free the library's malloc allocation exactly once.
        let ascii = unsafe { CStr::from_ptr(output) }.to_string_lossy().into_owned();
        unsafe { libc::free(output.cast()) };
        Ok(ascii)
    }
}

/// Replace everything outside printable ASCII with `?` so caller-supplied
/// text cannot smuggle control sequences into warning output.
pub fn printable_ascii(text: &str) -> String {
    text.chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}
