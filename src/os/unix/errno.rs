// readdir signals both end-of-stream and failure by returning NULL, so the
// only way to tell them apart is to clear errno first and inspect it after.
// libc exposes the thread-local errno slot under a different name on every
// platform family.

use libc::c_int;

#[cfg(target_os = "linux")]
unsafe fn location() -> *mut c_int {
    libc::__errno_location()
}

#[cfg(any(
    target_os = "android",
    target_os = "netbsd",
    target_os = "openbsd",
))]
unsafe fn location() -> *mut c_int {
    libc::__errno()
}

#[cfg(any(target_os = "freebsd", target_os = "ios", target_os = "macos"))]
unsafe fn location() -> *mut c_int {
    libc::__error()
}

/// Returns the calling thread's current errno value.
pub(crate) fn errno() -> i32 {
    unsafe { *location() as i32 }
}

/// Clears the calling thread's errno to 0.
pub(crate) fn clear() {
    unsafe {
        *location() = 0;
    }
}
