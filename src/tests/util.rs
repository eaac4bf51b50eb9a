use std::env;
use std::error;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::result;

use crate::{Entry, EntryId, Kind, Sorter, Walk};

/// Skip the current test if the current environment doesn't support
/// symlinks.
#[macro_export]
macro_rules! skip_if_no_symlinks {
    () => {
        if !$crate::tests::util::symlink_works() {
            eprintln!("skipping test because symlinks don't work");
            return;
        }
    };
}

/// Skip the current test when running as root, since root ignores the
/// permission bits the test relies on.
#[macro_export]
macro_rules! skip_if_root {
    () => {
        if unsafe { libc::geteuid() } == 0 {
            eprintln!("skipping test because root bypasses permissions");
            return;
        }
    };
}

/// Create an error from a format!-like syntax.
#[macro_export]
macro_rules! err {
    ($($tt:tt)*) => {
        Box::<dyn error::Error + Send + Sync>::from(format!($($tt)*))
    }
}

/// A convenient result type alias.
pub type Result<T> = result::Result<T, Box<dyn error::Error + Send + Sync>>;

/// An owned snapshot of one visit, so tests can keep driving the walk
/// while holding what it returned.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: EntryId,
    pub kind: Kind,
    pub name: OsString,
    pub path: PathBuf,
    pub level: i32,
    pub errno: Option<i32>,
    pub has_metadata: bool,
}

impl Event {
    pub fn of(ent: &Entry<'_>) -> Event {
        Event {
            id: ent.id(),
            kind: ent.kind(),
            name: ent.file_name().to_os_string(),
            path: ent.path(),
            level: ent.level(),
            errno: ent.io_error().and_then(|err| err.raw_os_error()),
            has_metadata: ent.metadata().is_some(),
        }
    }
}

/// Drive a walk to the end of its stream, collecting every visit.
pub fn collect(walk: &mut Walk) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = match walk.read().unwrap() {
            None => break,
            Some(ent) => Event::of(&ent),
        };
        events.push(event);
    }
    events
}

/// Project events down to (kind, final name) for sequence assertions.
pub fn pairs(events: &[Event]) -> Vec<(Kind, String)> {
    events
        .iter()
        .map(|e| (e.kind, e.name.to_string_lossy().into_owned()))
        .collect()
}

pub fn pair(kind: Kind, name: &str) -> (Kind, String) {
    (kind, name.to_string())
}

/// A sorter over final path components, for deterministic sequences in the
/// face of arbitrary readdir order.
pub fn by_name() -> Sorter {
    Box::new(|a: &Entry<'_>, b: &Entry<'_>| {
        a.file_name_bytes().cmp(b.file_name_bytes())
    })
}

/// A helper for managing a directory in which to run tests.
///
/// When manipulating paths within this directory, paths are interpreted
/// relative to this directory.
#[derive(Debug)]
pub struct Dir {
    dir: TempDir,
}

impl Dir {
    /// Create a new empty temporary directory.
    pub fn tmp() -> Dir {
        let dir = TempDir::new().unwrap();
        Dir { dir }
    }

    /// Return the path to this directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Return a path joined to the path to this directory.
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.path().join(path)
    }

    /// Create a directory at the given path, while creating all
    /// intermediate directories as needed.
    pub fn mkdirp<P: AsRef<Path>>(&self, path: P) {
        let full = self.join(path);
        fs::create_dir_all(&full)
            .map_err(|e| {
                err!("failed to create directory {}: {}", full.display(), e)
            })
            .unwrap();
    }

    /// Create an empty file at the given path. All ancestor directories
    /// must already exist.
    pub fn touch<P: AsRef<Path>>(&self, path: P) {
        let full = self.join(path);
        File::create(&full)
            .map_err(|e| {
                err!("failed to create file {}: {}", full.display(), e)
            })
            .unwrap();
    }

    /// Create empty files at the given paths. All ancestor directories
    /// must already exist.
    pub fn touch_all<P: AsRef<Path>>(&self, paths: &[P]) {
        for p in paths {
            self.touch(p);
        }
    }

    /// Change the permission bits of the given path.
    pub fn chmod<P: AsRef<Path>>(&self, path: P, mode: u32) {
        use std::os::unix::fs::PermissionsExt;

        let full = self.join(path);
        fs::set_permissions(&full, fs::Permissions::from_mode(mode))
            .map_err(|e| {
                err!("failed to chmod {}: {}", full.display(), e)
            })
            .unwrap();
    }

    /// Create a symlink to the given src with the given link name.
    pub fn symlink<P1: AsRef<Path>, P2: AsRef<Path>>(
        &self,
        src: P1,
        link_name: P2,
    ) {
        symlink(self.join(src), self.join(link_name)).unwrap()
    }
}

/// A simple wrapper for creating a temporary directory that is
/// automatically deleted when it's dropped.
///
/// We use this in lieu of tempfile because tempfile brings in too many
/// dependencies.
#[derive(Debug)]
pub struct TempDir(PathBuf);

impl Drop for TempDir {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.0).unwrap();
    }
}

impl TempDir {
    /// Create a new empty temporary directory under the system's
    /// configured temporary directory.
    pub fn new() -> Result<TempDir> {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static TRIES: usize = 100;
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        let tmpdir = env::temp_dir();
        for _ in 0..TRIES {
            let count = COUNTER.fetch_add(1, Ordering::SeqCst);
            let path = tmpdir.join("rust-treewalk").join(count.to_string());
            if path.is_dir() {
                continue;
            }
            fs::create_dir_all(&path).map_err(|e| {
                err!("failed to create {}: {}", path.display(), e)
            })?;
            return Ok(TempDir(path));
        }
        Err(err!("failed to create temp dir after {} tries", TRIES))
    }

    /// Return the underlying path to this temporary directory.
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Test whether symlinks are believed to work in this environment.
///
/// If they work, then return true, otherwise return false.
pub fn symlink_works() -> bool {
    use std::sync::atomic::{AtomicUsize, Ordering};

    // 0 = untried
    // 1 = works
    // 2 = does not work
    static WORKS: AtomicUsize = AtomicUsize::new(0);

    let status = WORKS.load(Ordering::SeqCst);
    if status != 0 {
        return status == 1;
    }

    let tmp = TempDir::new().unwrap();
    let foo = tmp.path().join("foo");
    let foolink = tmp.path().join("foo-link");
    File::create(&foo)
        .map_err(|e| {
            err!("error creating file {} for link test: {}", foo.display(), e)
        })
        .unwrap();
    if symlink(&foo, &foolink).is_err() || fs::read(&foolink).is_err() {
        WORKS.store(2, Ordering::SeqCst);
        return false;
    }
    WORKS.store(1, Ordering::SeqCst);
    true
}

/// Create a symlink to the given src with the given link name.
fn symlink<P1: AsRef<Path>, P2: AsRef<Path>>(
    src: P1,
    link_name: P2,
) -> Result<()> {
    use std::os::unix::fs::symlink;

    symlink(src.as_ref(), link_name.as_ref()).map_err(|e| {
        err!(
            "failed to symlink {} with target {}: {}",
            link_name.as_ref().display(),
            src.as_ref().display(),
            e
        )
    })
}
