// POSIX only promises that `dirent` has `d_ino` and `d_name`, and even that
// much isn't portable in practice. The BSDs carry a `d_namlen` with the name
// length while Linux only has `d_reclen` (which includes padding, so it's
// useless for finding the name's end), and the type hint in `d_type` is a
// common extension rather than a guarantee. This module papers over the
// differences for the platforms this crate supports and avoids NUL scans
// where the platform already knows the length.

use std::ffi::CStr;
use std::fmt;
use std::ptr::NonNull;
#[cfg(any(
    target_os = "freebsd",
    target_os = "macos",
    target_os = "ios",
    target_os = "netbsd",
    target_os = "openbsd",
))]
use std::slice;

#[cfg(any(
    target_os = "freebsd",
    target_os = "macos",
    target_os = "ios",
    target_os = "netbsd",
    target_os = "openbsd",
))]
use libc::dirent;
#[cfg(any(target_os = "android", target_os = "linux"))]
use libc::dirent64 as dirent;

use crate::os::unix::escaped_bytes;

/// The whiteout type hint. Not every libc exposes the constant, but the
/// value is universal where whiteouts exist at all.
pub(crate) const DT_WHT: u8 = 14;

/// A borrowed view of one `dirent` as returned by `readdir`.
///
/// The view is only valid until the next `readdir` call on the same stream,
/// which is why [`super::DirEntry`] copies out of it.
pub(crate) struct RawDirEntry(NonNull<dirent>);

impl fmt::Debug for RawDirEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RawDirEntry")
            .field("d_name", &escaped_bytes(self.file_name().to_bytes()))
            .field("d_type", &self.type_hint())
            .field("d_ino", &self.ino())
            .finish()
    }
}

impl RawDirEntry {
    /// Wrap the pointer handed back by `readdir`, or `None` at end of
    /// stream.
    pub(crate) fn new(ent: *const dirent) -> Option<RawDirEntry> {
        NonNull::new(ent as *mut dirent).map(RawDirEntry)
    }

    fn dirent(&self) -> &dirent {
        // SAFETY: the lifetime of the dirent is tied to self, and self is
        // never kept across another readdir call.
        unsafe { self.0.as_ref() }
    }

    /// The entry's file name as a C string.
    pub(crate) fn file_name(&self) -> &CStr {
        // These platforms record the name length in the dirent.
        #[cfg(any(
            target_os = "freebsd",
            target_os = "macos",
            target_os = "ios",
            target_os = "netbsd",
            target_os = "openbsd",
        ))]
        fn imp(ent: &RawDirEntry) -> &CStr {
            // SAFETY: d_namlen is the name length sans NUL and d_name is
            // NUL terminated.
            unsafe {
                let bytes = slice::from_raw_parts(
                    ent.dirent().d_name.as_ptr() as *const u8,
                    ent.dirent().d_namlen as usize + 1,
                );
                CStr::from_bytes_with_nul_unchecked(bytes)
            }
        }

        // Linux has no d_namlen, so scan for the NUL.
        #[cfg(any(target_os = "android", target_os = "linux"))]
        fn imp(ent: &RawDirEntry) -> &CStr {
            // SAFETY: d_name is guaranteed to be NUL terminated.
            unsafe {
                CStr::from_ptr(
                    ent.dirent().d_name.as_ptr() as *const libc::c_char
                )
            }
        }

        imp(self)
    }

    /// The raw `d_type` byte. `DT_UNKNOWN` (zero) when the filesystem does
    /// not fill it in.
    pub(crate) fn type_hint(&self) -> u8 {
        self.dirent().d_type
    }

    /// The file serial number.
    pub(crate) fn ino(&self) -> u64 {
        #[cfg(any(
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
        ))]
        fn imp(ent: &RawDirEntry) -> u64 {
            ent.dirent().d_fileno as u64
        }

        #[cfg(any(
            target_os = "android",
            target_os = "linux",
            target_os = "macos",
            target_os = "ios",
        ))]
        fn imp(ent: &RawDirEntry) -> u64 {
            ent.dirent().d_ino as u64
        }

        imp(self)
    }
}
