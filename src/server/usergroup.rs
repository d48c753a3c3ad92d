//! The uid-in-group check behind the `auth-group` option.

use std::ffi::CString;

/// Whether `uid` is a member of the group named `group`, either through
/// the group's member list or as the primary group of the user.
pub fn uid_in_group(uid: u32, group: &str) -> bool {
    let Some(gid) = group_gid(group) else {
        return false;
    };

    let Some((user_name, primary_gid)) = user_for_uid(uid) else {
        return false;
    };

    if primary_gid == gid {
        return true;
    }

    group_members(group)
        .iter()
        .any(|member| *member == user_name)
}

fn group_gid(group: &str) -> Option<u32> {
    let name = CString::new(group).ok()?;
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::group = std::ptr::null_mut();

    let rc = unsafe {
        libc::getgrnam_r(
            name.as_ptr(),
            &mut grp,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return None;
    }

    Some(grp.gr_gid)
}

fn group_members(group: &str) -> Vec<CString> {
    let Ok(name) = CString::new(group) else {
        return Vec::new();
    };

    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 8192];
    let mut result: *mut libc::group = std::ptr::null_mut();

    let rc = unsafe {
        libc::getgrnam_r(
            name.as_ptr(),
            &mut grp,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return Vec::new();
    }

    let mut members = Vec::new();
    let mut cursor = grp.gr_mem;
    unsafe {
        while !cursor.is_null() && !(*cursor).is_null() {
            members.push(std::ffi::CStr::from_ptr(*cursor).to_owned());
            cursor = cursor.add(1);
        }
    }

    members
}

/// The login name of `uid`, if it can be resolved.
pub fn user_name(uid: u32) -> Option<CString> {
    user_for_uid(uid).map(|(name, _)| name)
}

fn user_for_uid(uid: u32) -> Option<(CString, u32)> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0u8; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return None;
    }

    let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) }.to_owned();
    Some((name, pwd.pw_gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_group_is_never_a_match() {
        assert!(!uid_in_group(0, "pavane-no-such-group"));
    }

    #[test]
    fn root_is_in_its_own_primary_group() {
        // The root group is named "root" on Linux.
        if group_gid("root").is_some() {
            assert!(uid_in_group(0, "root"));
        }
    }
}
