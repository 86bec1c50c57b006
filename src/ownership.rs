//! Ownership assignment for the generated key and certificate.
//!
//! Installers hand the PEM pair to the agent's service account. Lookups go
//! through the reentrant libc calls and report failures as
//! [`UserLookupError`] carrying the call name, the identity, and the OS
//! error, keeping account problems distinguishable from crypto problems.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::UserLookupError;

const INITIAL_BUF: usize = 1024;
const MAX_BUF: usize = 1 << 20;

/// Resolve a user account to its uid and primary gid.
pub fn resolve_user(name: &str) -> Result<(libc::uid_t, libc::gid_t), UserLookupError> {
    let call = "getpwnam_r";
    let c_user = c_name(call, name)?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; INITIAL_BUF];
    loop {
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                c_user.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(lookup_error(call, name, io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            // Not-found comes back as success with a null result.
            return Err(lookup_error(
                call,
                name,
                io::Error::from_raw_os_error(libc::ENOENT),
            ));
        }
        return Ok((pwd.pw_uid, pwd.pw_gid));
    }
}

/// Resolve a group name to its gid.
pub fn resolve_group(name: &str) -> Result<libc::gid_t, UserLookupError> {
    let call = "getgrnam_r";
    let c_group = c_name(call, name)?;
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; INITIAL_BUF];
    loop {
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrnam_r(
                c_group.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < MAX_BUF {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 {
            return Err(lookup_error(call, name, io::Error::from_raw_os_error(rc)));
        }
        if result.is_null() {
            return Err(lookup_error(
                call,
                name,
                io::Error::from_raw_os_error(libc::ENOENT),
            ));
        }
        return Ok(grp.gr_gid);
    }
}

/// Chown `path` to the resolved ids. `name` is the account the ids came
/// from, used only for error reporting.
pub fn set_owner(
    path: &Path,
    uid: libc::uid_t,
    gid: libc::gid_t,
    name: &str,
) -> Result<(), UserLookupError> {
    let call = "chown";
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| lookup_error(call, name, io::Error::from_raw_os_error(libc::EINVAL)))?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(lookup_error(call, name, io::Error::last_os_error()));
    }
    Ok(())
}

fn lookup_error(call: &'static str, name: &str, source: io::Error) -> UserLookupError {
    UserLookupError {
        call,
        name: name.to_string(),
        source,
    }
}

fn c_name(call: &'static str, name: &str) -> Result<CString, UserLookupError> {
    CString::new(name)
        .map_err(|_| lookup_error(call, name, io::Error::from_raw_os_error(libc::EINVAL)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_root_user() {
        let (uid, gid) = resolve_user("root").unwrap();
        assert_eq!(uid, 0);
        assert_eq!(gid, 0);
    }

    #[test]
    fn test_resolve_unknown_user_reports_call_and_errno() {
        let err = resolve_user("hostcert-no-such-user").unwrap_err();
        assert_eq!(err.call, "getpwnam_r");
        assert_eq!(err.name, "hostcert-no-such-user");
        assert_eq!(err.errno(), Some(libc::ENOENT));
        let text = err.to_string();
        assert!(text.contains("getpwnam_r"));
        assert!(text.contains("hostcert-no-such-user"));
    }

    #[test]
    fn test_resolve_root_group() {
        assert_eq!(resolve_group("root").unwrap(), 0);
    }

    #[test]
    fn test_set_owner_to_current_ids_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("owned");
        std::fs::write(&file, b"x").unwrap();

        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        set_owner(&file, uid, gid, "self").unwrap();
    }

    #[test]
    fn test_set_owner_on_missing_path_fails_with_chown() {
        let err = set_owner(Path::new("/nonexistent/hostcert"), 0, 0, "root").unwrap_err();
        assert_eq!(err.call, "chown");
        assert!(err.errno().is_some());
    }
}
