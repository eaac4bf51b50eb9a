use std::ffi::CStr;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
use libc::{fstatat as fstatat64, lstat as lstat64, stat as stat64};
#[cfg(any(target_os = "linux", target_os = "android"))]
use libc::{fstatat64, lstat64, stat64};

/// Metadata for a file, as reported by `stat`, `lstat` or `fstatat`.
///
/// This wraps the host's stat structure directly. Field types vary between
/// platforms, so every accessor widens to a fixed-size integer.
#[derive(Clone)]
pub struct Metadata {
    stat: stat64,
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("file_type", &self.file_type())
            .field("dev", &self.dev())
            .field("ino", &self.ino())
            .field("nlink", &self.nlink())
            .field("len", &self.len())
            .finish()
    }
}

impl Metadata {
    /// The file type bits of `st_mode`.
    pub fn file_type(&self) -> FileType {
        FileType::from_stat_mode(self.stat.st_mode as u64)
    }

    /// The size of the file, in bytes.
    pub fn len(&self) -> u64 {
        self.stat.st_size as u64
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The device containing the file.
    pub fn dev(&self) -> u64 {
        self.stat.st_dev as u64
    }

    /// The file serial number.
    pub fn ino(&self) -> u64 {
        self.stat.st_ino as u64
    }

    /// The number of hard links. For a directory on traditional Unix
    /// filesystems this is 2 plus the number of subdirectories.
    pub fn nlink(&self) -> u64 {
        self.stat.st_nlink as u64
    }

    /// The full `st_mode` value, type and permission bits included.
    pub fn mode(&self) -> u64 {
        self.stat.st_mode as u64
    }
}

/// One of seven possible file types on Unix.
#[derive(Clone, Copy)]
pub struct FileType(libc::mode_t);

impl fmt::Debug for FileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let human = if self.is_file() {
            "File"
        } else if self.is_dir() {
            "Directory"
        } else if self.is_symlink() {
            "Symbolic Link"
        } else if self.is_block_device() {
            "Block Device"
        } else if self.is_char_device() {
            "Char Device"
        } else if self.is_fifo() {
            "FIFO"
        } else if self.is_socket() {
            "Socket"
        } else {
            "Unknown"
        };
        write!(f, "FileType({})", human)
    }
}

impl FileType {
    /// Create a new file type from a directory entry's type field.
    ///
    /// If the given type is not recognized or is `DT_UNKNOWN`, then `None`
    /// is returned.
    pub fn from_dirent_type(d_type: u8) -> Option<FileType> {
        Some(FileType(match d_type {
            libc::DT_REG => libc::S_IFREG,
            libc::DT_DIR => libc::S_IFDIR,
            libc::DT_LNK => libc::S_IFLNK,
            libc::DT_BLK => libc::S_IFBLK,
            libc::DT_CHR => libc::S_IFCHR,
            libc::DT_FIFO => libc::S_IFIFO,
            libc::DT_SOCK => libc::S_IFSOCK,
            _ => return None,
        }))
    }

    /// Create a new file type from a stat's `st_mode` field.
    pub fn from_stat_mode(st_mode: u64) -> FileType {
        FileType(st_mode as libc::mode_t)
    }

    /// Returns true if this file type is a regular file.
    pub fn is_file(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFREG
    }

    /// Returns true if this file type is a directory.
    pub fn is_dir(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFDIR
    }

    /// Returns true if this file type is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFLNK
    }

    /// Returns true if this file type is a block device.
    pub fn is_block_device(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFBLK
    }

    /// Returns true if this file type is a character device.
    pub fn is_char_device(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFCHR
    }

    /// Returns true if this file type is a FIFO.
    pub fn is_fifo(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFIFO
    }

    /// Returns true if this file type is a socket.
    pub fn is_socket(&self) -> bool {
        self.0 & libc::S_IFMT == libc::S_IFSOCK
    }
}

/// Stat the given path, following symbolic links.
pub(crate) fn stat_c(path: &CStr) -> io::Result<Metadata> {
    let mut stat: stat64 = unsafe { mem::zeroed() };
    let res = unsafe { stat64(path.as_ptr(), &mut stat) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(Metadata { stat })
    }
}

/// Stat the given path without following symbolic links.
pub(crate) fn lstat_c(path: &CStr) -> io::Result<Metadata> {
    let mut stat: stat64 = unsafe { mem::zeroed() };
    let res = unsafe { lstat64(path.as_ptr(), &mut stat) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(Metadata { stat })
    }
}

/// Stat `name` relative to the directory `parent_dirfd`, following symbolic
/// links.
pub(crate) fn statat_c(
    parent_dirfd: RawFd,
    name: &CStr,
) -> io::Result<Metadata> {
    let mut stat: stat64 = unsafe { mem::zeroed() };
    let res = unsafe { fstatat64(parent_dirfd, name.as_ptr(), &mut stat, 0) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(Metadata { stat })
    }
}

/// Stat `name` relative to the directory `parent_dirfd` without following
/// symbolic links.
pub(crate) fn lstatat_c(
    parent_dirfd: RawFd,
    name: &CStr,
) -> io::Result<Metadata> {
    let mut stat: stat64 = unsafe { mem::zeroed() };
    let res = unsafe {
        fstatat64(
            parent_dirfd,
            name.as_ptr(),
            &mut stat,
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(Metadata { stat })
    }
}
