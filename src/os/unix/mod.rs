/*!
Low level Unix specific APIs for reading directory entries via `readdir`
and for holding directories open as file descriptors.
*/

use std::ffi::CStr;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::ptr::NonNull;

#[cfg(any(
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
))]
use libc::readdir;
#[cfg(any(target_os = "android", target_os = "linux"))]
use libc::readdir64 as readdir;

use crate::os::unix::dirent::RawDirEntry;

pub(crate) mod dirent;
pub(crate) mod errno;
pub(crate) mod stat;

pub use crate::os::unix::stat::{FileType, Metadata};

/// A low-level Unix specific directory entry.
///
/// This type corresponds as closely as possible to the `dirent` structure.
/// It owns a copy of the file name, since the name returned by `readdir` is
/// only valid until the next call on the same stream, and keeps the raw
/// type hint byte so callers can distinguish "not a directory" from
/// "unknown" without a stat call.
#[derive(Clone)]
pub(crate) struct DirEntry {
    /// The file name as a NUL terminated byte vector. A `Vec<u8>` rather
    /// than a `CString` so the allocation amortizes across reads.
    file_name: Vec<u8>,
    /// The raw `d_type` byte, `DT_UNKNOWN` when absent.
    type_hint: u8,
    /// The file serial number.
    ino: u64,
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("file_name", &escaped_bytes(self.file_name_bytes()))
            .field("type_hint", &self.type_hint)
            .field("ino", &self.ino)
            .finish()
    }
}

impl DirEntry {
    /// Create a new empty directory entry, as space for `Dir::read_into`.
    pub(crate) fn empty() -> DirEntry {
        DirEntry { file_name: vec![0], type_hint: libc::DT_UNKNOWN, ino: 0 }
    }

    fn from_raw(&mut self, raw: &RawDirEntry) {
        self.type_hint = raw.type_hint();
        self.ino = raw.ino();

        let bytes = raw.file_name().to_bytes_with_nul();
        self.file_name.resize(bytes.len(), 0);
        self.file_name.copy_from_slice(bytes);
    }

    /// The file name without its NUL terminator.
    pub(crate) fn file_name_bytes(&self) -> &[u8] {
        &self.file_name[..self.file_name.len() - 1]
    }

    /// The file type according to the directory entry, if the filesystem
    /// reported one.
    pub(crate) fn file_type(&self) -> Option<FileType> {
        FileType::from_dirent_type(self.type_hint)
    }

    /// Whether this entry is a whiteout marker in a union mount.
    pub(crate) fn is_whiteout(&self) -> bool {
        self.type_hint == dirent::DT_WHT
    }
}

/// A file descriptor opened with `O_DIRECTORY`.
///
/// The descriptor is closed when the value is dropped.
#[derive(Debug)]
pub(crate) struct DirFd(RawFd);

unsafe impl Send for DirFd {}

impl Drop for DirFd {
    fn drop(&mut self) {
        unsafe {
            // Errors on close are ignored here; use DirFd::close to see
            // them.
            libc::close(self.0);
        }
    }
}

impl AsRawFd for DirFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl DirFd {
    /// Open a descriptor for the given directory path.
    pub(crate) fn open_c(dir_path: &CStr) -> io::Result<DirFd> {
        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;
        // SAFETY: dir_path is NUL terminated with no interior NULs.
        let fd = unsafe { libc::open(dir_path.as_ptr(), flags) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(DirFd(fd))
        }
    }

    /// Open a descriptor for the directory named `dir_name` inside the
    /// directory `parent_dirfd` refers to.
    ///
    /// Prefer this over `open_c` when a parent descriptor is at hand: the
    /// kernel resolves one component instead of the whole path.
    pub(crate) fn openat_c(
        parent_dirfd: RawFd,
        dir_name: &CStr,
    ) -> io::Result<DirFd> {
        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;
        // SAFETY: dir_name is NUL terminated with no interior NULs.
        let fd =
            unsafe { libc::openat(parent_dirfd, dir_name.as_ptr(), flags) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(DirFd(fd))
        }
    }

    /// Duplicate an existing descriptor into a new `DirFd`.
    ///
    /// Used to keep a directory open after its read stream has been closed.
    pub(crate) fn duplicate(fd: RawFd) -> io::Result<DirFd> {
        let newfd = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        if newfd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(DirFd(newfd))
        }
    }

    /// Close this descriptor and report the error, if any.
    ///
    /// Dropping a `DirFd` also closes it but swallows the error.
    pub(crate) fn close(self) -> io::Result<()> {
        let res = if unsafe { libc::close(self.0) } < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        };
        // The descriptor is gone either way; don't close it again on drop.
        mem::forget(self);
        res
    }
}

/// A handle to a directory stream.
///
/// The stream is closed when the value is dropped.
#[derive(Debug)]
pub(crate) struct Dir(NonNull<libc::DIR>);

unsafe impl Send for Dir {}

impl Drop for Dir {
    fn drop(&mut self) {
        unsafe {
            libc::closedir(self.0.as_ptr());
        }
    }
}

impl Dir {
    /// Turn an open directory descriptor into a stream.
    ///
    /// On success the stream owns the descriptor. On failure the
    /// descriptor is closed before returning.
    pub(crate) fn from_dirfd(fd: DirFd) -> io::Result<Dir> {
        // SAFETY: fd is a valid open directory descriptor.
        match NonNull::new(unsafe { libc::fdopendir(fd.as_raw_fd()) }) {
            Some(dir) => {
                // The stream owns the descriptor now.
                mem::forget(fd);
                Ok(Dir(dir))
            }
            None => Err(io::Error::last_os_error()),
        }
    }

    /// Rewind this stream so that it restarts at the beginning of the
    /// directory.
    pub(crate) fn rewind(&mut self) {
        unsafe {
            libc::rewinddir(self.0.as_ptr());
        }
    }

    /// Read the next directory entry from this stream into the given space.
    ///
    /// Returns false when the end of the stream is reached. If reading
    /// fails, the error is returned and the contents of `ent` are
    /// unspecified; callers may continue reading afterwards.
    ///
    /// No filtering of entries (such as `.` and `..`) is performed.
    pub(crate) fn read_into(&mut self, ent: &mut DirEntry) -> io::Result<bool> {
        // Clearing errno is the only way to tell an error from the end of
        // the stream, since readdir returns NULL for both.
        errno::clear();
        match RawDirEntry::new(unsafe { readdir(self.0.as_ptr()) }) {
            Some(raw) => {
                ent.from_raw(&raw);
                Ok(true)
            }
            None => {
                if errno::errno() != 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// Return a convenience ASCII-only debug representation of the given bytes.
/// In essence, non-ASCII and non-printable bytes are escaped.
pub(crate) fn escaped_bytes(bytes: &[u8]) -> String {
    use std::ascii::escape_default;

    bytes.iter().cloned().flat_map(escape_default).map(|b| b as char).collect()
}
