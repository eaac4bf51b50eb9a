use std::cmp;
use std::cmp::Ordering;
use std::ffi::{CString, OsStr};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::entry::{
    append_at, full_path_bytes, is_dot, Arena, EntryId, Kind, ROOT_LEVEL,
    ROOT_PARENT_LEVEL,
};
use crate::os::unix as os;
use crate::os::unix::stat;
use crate::os::unix::{Dir, DirFd, Metadata};
use crate::path::PathBuffer;

/// Room for most paths up front; the buffer grows past this on demand, so
/// trees deeper than any fixed limit still walk.
const INITIAL_PATH_CAPACITY: usize = 1024;

/// Traversal options, composed as a bit mask.
///
/// With no bits set the walk is physical: symbolic links are reported as
/// themselves and never followed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Options(u32);

impl Options {
    /// Dereference symbolic links given as root arguments, but no others.
    pub const COMFOLLOW: Options = Options(0b0000_0001);
    /// Dereference every symbolic link encountered.
    pub const LOGICAL: Options = Options(0b0000_0010);
    /// Never retain directory handles; every syscall receives the full
    /// path. Slower, but holds no descriptors between visits.
    pub const FULL_PATHS: Options = Options(0b0000_0100);
    /// Skip stat calls where directory entry type hints or the parent's
    /// link count make them unnecessary. Callers must tolerate entries of
    /// kind [`Kind::NoStat`].
    pub const NO_STAT: Options = Options(0b0000_1000);
    /// Treat every symbolic link as a leaf. This is the default walk mode;
    /// the bit exists so callers can say so explicitly, and it arms the
    /// stat elision arithmetic of [`Options::NO_STAT`].
    pub const PHYSICAL: Options = Options(0b0001_0000);
    /// Include `.` and `..` in enumeration, as entries of kind
    /// [`Kind::Dot`].
    pub const SEE_DOT: Options = Options(0b0010_0000);
    /// Do not descend into directories on a different device than the
    /// root they were reached from.
    pub const SAME_FILE_SYSTEM: Options = Options(0b0100_0000);
    /// Include whiteout entries in enumeration, as entries of kind
    /// [`Kind::Whiteout`].
    pub const WHITEOUT: Options = Options(0b1000_0000);

    const MASK: u32 = 0b1111_1111;

    /// No options set.
    pub fn empty() -> Options {
        Options(0)
    }

    /// The raw bit representation.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstitute options from raw bits. Returns `None` if any bit
    /// outside the defined set is present.
    pub fn from_bits(bits: u32) -> Option<Options> {
        if bits & !Options::MASK != 0 {
            None
        } else {
            Some(Options(bits))
        }
    }

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

/// A one-shot instruction attached to an entry with
/// [`Walk::set_instruction`], consumed at that entry's next visit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction {
    /// Do not visit any descendant of this directory. Its post-order
    /// visit still happens.
    Skip,
    /// Dereference this symbolic link and revisit it as whatever it points
    /// at; if that is a directory, the walk descends into it.
    Follow,
    /// Stat this entry again and revisit it.
    Again,
}

/// A comparator over sibling entries. When supplied to [`Walk::open`],
/// every batch of siblings (the roots included) is emitted in the order it
/// induces.
pub type Sorter =
    Box<dyn FnMut(&Entry<'_>, &Entry<'_>) -> Ordering + Send + Sync + 'static>;

#[derive(Clone, Copy, Eq, PartialEq)]
enum BuildMode {
    /// Reading children in order to descend.
    Read,
    /// Peeking at children for [`Walk::children`].
    Peek,
    /// Peeking at names only; no stats at all.
    Names,
}

/// A depth-first traversal of one or more directory hierarchies.
///
/// Directories are visited twice, before and after their contents; see the
/// crate documentation for the full visit discipline. A walk is driven by
/// calling [`Walk::read`] until it returns `Ok(None)`.
pub struct Walk {
    options: Options,
    arena: Arena,
    path: PathBuffer,
    /// The entry most recently returned, or the init sentinel before the
    /// first read, or `None` once the stream is exhausted.
    cur: Option<EntryId>,
    /// Children produced by the peek API but not yet handed over.
    pending: Option<EntryId>,
    pending_names_only: bool,
    sorter: Option<Sorter>,
    /// Grow-only scratch space for sorting sibling chains.
    scratch: Vec<EntryId>,
    /// Device of the current root; directories elsewhere are fenced off
    /// under [`Options::SAME_FILE_SYSTEM`].
    dev: u64,
    /// Sticky fatal errno. Once set, `read` and `children` fail with it
    /// until the walk is dropped.
    stop: Option<i32>,
}

impl fmt::Debug for Walk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sorter = if self.sorter.is_some() { "Some(...)" } else { "None" };
        f.debug_struct("Walk")
            .field("options", &self.options)
            .field("cur", &self.cur)
            .field("pending", &self.pending)
            .field("pending_names_only", &self.pending_names_only)
            .field("dev", &self.dev)
            .field("stop", &self.stop)
            .field("sorter", &sorter)
            .finish()
    }
}

impl Walk {
    /// Begin a traversal of the given root paths.
    ///
    /// Roots are visited in the order given, or in sorted order when a
    /// sorter is supplied. An empty root path is rejected with `ENOENT`.
    /// `.` and `..` given as roots are walked like any other directory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use treewalk::{Kind, Options, Walk};
    ///
    /// # fn example() -> std::io::Result<()> {
    /// let mut walk = Walk::open(&["/var/log"], Options::PHYSICAL, None)?;
    /// while let Some(ent) = walk.read()? {
    ///     if ent.kind() == Kind::PreDir {
    ///         println!("{}/", ent.path().display());
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<I, P>(
        paths: I,
        options: Options,
        sorter: Option<Sorter>,
    ) -> io::Result<Walk>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut args: Vec<Vec<u8>> = Vec::new();
        let mut max_arg = 0;
        for path in paths {
            let bytes = path.as_ref().as_os_str().as_bytes().to_vec();
            if bytes.is_empty() {
                return Err(io::Error::from_raw_os_error(libc::ENOENT));
            }
            if bytes.contains(&0) {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            max_arg = cmp::max(max_arg, bytes.len());
            args.push(bytes);
        }

        let mut walk = Walk {
            options,
            arena: Arena::new(),
            path: PathBuffer::with_capacity(cmp::max(
                max_arg,
                INITIAL_PATH_CAPACITY,
            )),
            cur: None,
            pending: None,
            pending_names_only: false,
            sorter,
            scratch: Vec::new(),
            dev: 0,
            stop: None,
        };

        let parent = walk.arena.alloc(b"", None, ROOT_PARENT_LEVEL, 0);
        walk.arena[parent].kind = Kind::Init;

        let follow_roots = options.contains(Options::COMFOLLOW);
        let mut head: Option<EntryId> = None;
        let mut tail: Option<EntryId> = None;
        let mut count = 0;
        for bytes in &args {
            let id = walk.arena.alloc(
                bytes,
                Some(parent),
                ROOT_LEVEL,
                bytes.len(),
            );
            let mut kind = walk.probe(id, follow_roots, false);
            // "." and ".." on the command line are real directories.
            if kind == Kind::Dot {
                kind = Kind::PreDir;
            }
            walk.arena[id].kind = kind;
            match tail {
                Some(t) => walk.arena[t].link = Some(id),
                None => head = Some(id),
            }
            tail = Some(id);
            count += 1;
        }
        if walk.sorter.is_some() && count > 1 {
            head = Some(walk.sort_chain(head.expect("roots"), count));
        }

        // A sentinel just before the roots, so the first read looks like
        // any other lateral step.
        let init = walk.arena.alloc(b"", None, ROOT_PARENT_LEVEL, 0);
        walk.arena[init].kind = Kind::Init;
        walk.arena[init].link = head;
        walk.cur = Some(init);
        Ok(walk)
    }

    /// Return the next entry in the stream, or `Ok(None)` once every root
    /// has been fully visited.
    ///
    /// After a fatal error this returns `Err` with the same error on every
    /// call until the walk is dropped.
    pub fn read(&mut self) -> io::Result<Option<Entry<'_>>> {
        match self.advance()? {
            Some(id) => {
                // A directory proves it can be read before its pre-order
                // visit is surfaced; one that can't becomes a single
                // unreadable visit instead of a pre/post pair.
                if self.arena[id].kind == Kind::PreDir {
                    self.commit_pre_dir(id);
                }
                Ok(Some(self.view(id)))
            }
            None => Ok(None),
        }
    }

    /// The entries of the directory the cursor currently rests on, without
    /// moving the cursor.
    ///
    /// Before the first [`Walk::read`] this returns the root entries. If
    /// the cursor is not a pre-order directory visit, the iterator is
    /// empty; an empty directory is distinguishable from that by the
    /// cursor's kind. With `names_only`, no metadata is gathered and every
    /// child is reported as [`Kind::NoStat`].
    ///
    /// The returned entries become part of the stream: a subsequent `read`
    /// hands over to the first of them (after rebuilding with stats if
    /// only names were requested). Instructions set on them are honoured.
    pub fn children(&mut self, names_only: bool) -> io::Result<Children<'_>> {
        if let Some(errno) = self.stop {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let cur = match self.cur {
            Some(id) => id,
            None => return Ok(self.children_view(None)),
        };
        if self.arena[cur].kind == Kind::Init {
            // The logical hierarchy of the caller's arguments.
            let head = self.arena[cur].link;
            return Ok(self.children_view(head));
        }
        if self.arena[cur].kind != Kind::PreDir {
            return Ok(self.children_view(None));
        }
        self.free_pending();
        let mode = if names_only { BuildMode::Names } else { BuildMode::Peek };
        let head = self.build(mode)?;
        self.pending = head;
        self.pending_names_only = names_only;
        Ok(self.children_view(head))
    }

    /// Attach an instruction to a live entry, to be consumed at that
    /// entry's next visit. `None` clears a previously set instruction.
    ///
    /// Fails with `InvalidInput` if the entry has already left the stream.
    pub fn set_instruction(
        &mut self,
        id: EntryId,
        instr: Option<Instruction>,
    ) -> io::Result<()> {
        match self.arena.get_mut(id) {
            Some(node) => {
                node.instr = instr;
                Ok(())
            }
            None => Err(stale_id()),
        }
    }

    /// Set the caller-owned scratch number of a live entry.
    ///
    /// The engine never touches this value; it is preserved across the
    /// pre- and post-order visits of a directory.
    pub fn set_number(&mut self, id: EntryId, number: u64) -> io::Result<()> {
        match self.arena.get_mut(id) {
            Some(node) => {
                node.number = number;
                Ok(())
            }
            None => Err(stale_id()),
        }
    }

    /// Look at a live entry again by id, e.g. one returned from
    /// [`Walk::children`].
    pub fn entry(&self, id: EntryId) -> Option<Entry<'_>> {
        self.arena.get(id)?;
        Some(self.view(id))
    }

    /// The full path of the current cursor.
    pub fn path(&self) -> &Path {
        Path::new(OsStr::from_bytes(self.path.as_bytes()))
    }

    /// Tear the walk down, reporting the first error from closing retained
    /// directory handles.
    ///
    /// Dropping a `Walk` releases the same resources but swallows errors.
    pub fn close(mut self) -> io::Result<()> {
        let mut first_err = None;
        for node in self.arena.live_mut() {
            if let Some(handle) = node.handle.take() {
                if let Err(err) = handle.close() {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn view(&self, id: EntryId) -> Entry<'_> {
        Entry { arena: &self.arena, buf: &self.path, id }
    }

    fn children_view(&self, head: Option<EntryId>) -> Children<'_> {
        Children { arena: &self.arena, buf: &self.path, next: head }
    }

    /// The visit state machine. One call returns one entry id, or `None`
    /// at the end of the stream.
    fn advance(&mut self) -> io::Result<Option<EntryId>> {
        if let Some(errno) = self.stop {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let mut cur = match self.cur {
            Some(id) => id,
            None => return Ok(None),
        };

        let instr = self.arena[cur].instr.take();

        // Any kind of entry may be revisited: stat again and return.
        if instr == Some(Instruction::Again) {
            let kind = self.probe(cur, false, false);
            self.arena[cur].kind = kind;
            return Ok(Some(cur));
        }

        // Following a symlink. Broken links stay visible as such so the
        // caller can see the failure and recover.
        if instr == Some(Instruction::Follow)
            && matches!(
                self.arena[cur].kind,
                Kind::Symlink | Kind::BrokenSymlink
            )
        {
            let kind = self.probe(cur, true, false);
            self.arena[cur].kind = kind;
            return Ok(Some(cur));
        }

        // Directory in pre-order.
        if self.arena[cur].kind == Kind::PreDir {
            // Skipped, or on the wrong side of a mount point: go straight
            // to the post-order visit.
            if instr == Some(Instruction::Skip)
                || (self.options.contains(Options::SAME_FILE_SYSTEM)
                    && self.arena[cur].dev != self.dev)
            {
                self.arena[cur].handle = None;
                self.free_pending();
                self.arena[cur].kind = Kind::PostDir;
                return Ok(Some(cur));
            }

            // A names-only peek gathered no stats; rebuild for descent.
            if self.pending.is_some() && self.pending_names_only {
                self.free_pending();
            }

            let head = match self.pending.take() {
                Some(head) => head,
                None => match self.build(BuildMode::Read)? {
                    Some(head) => head,
                    // Empty or unreadable; the node was reclassified and
                    // is its own next visit.
                    None => return Ok(Some(cur)),
                },
            };
            self.pending_names_only = false;

            // Hand over to the first child.
            let at = append_at(&self.arena[cur], &self.path);
            self.path.set_name(at, self.arena[head].name_bytes());
            self.cur = Some(head);
            return Ok(Some(head));
        }

        // Move along the sibling chain, ascending when it runs out.
        loop {
            if let Some(sib) = self.arena[cur].link {
                self.arena.release(cur);

                // Reached the next root: reload the path buffer and the
                // device pin. Instructions are not consumed at this
                // transition.
                if self.arena[sib].level == ROOT_LEVEL {
                    self.load_root(sib);
                    self.cur = Some(sib);
                    return Ok(Some(sib));
                }

                if self.arena[sib].instr == Some(Instruction::Skip) {
                    self.arena[sib].instr = None;
                    cur = sib;
                    continue;
                }
                if self.arena[sib].instr == Some(Instruction::Follow) {
                    self.arena[sib].instr = None;
                    let kind = self.probe(sib, true, false);
                    self.arena[sib].kind = kind;
                }
                // An Again instruction stays put; it is consumed when the
                // entry is current and read again.

                let parent =
                    self.arena[sib].parent.expect("non-root has a parent");
                let at = append_at(&self.arena[parent], &self.path);
                self.path.set_name(at, self.arena[sib].name_bytes());
                self.cur = Some(sib);
                return Ok(Some(sib));
            }

            // Sibling chain exhausted: ascend.
            let parent = self.arena[cur].parent;
            self.arena.release(cur);
            let parent = match parent {
                Some(id) => id,
                // Only reachable on a walk opened with no roots.
                None => {
                    self.cur = None;
                    return Ok(None);
                }
            };
            if self.arena[parent].level < ROOT_LEVEL {
                // Past the last root; the stream is done.
                self.arena.release(parent);
                self.cur = None;
                return Ok(None);
            }
            self.path.truncate(self.arena[parent].path_len);
            // The handle has served the pre-order visit and every
            // descendant; nothing below needs it anymore.
            self.arena[parent].handle = None;
            let node = &mut self.arena[parent];
            node.kind =
                if node.errno != 0 { Kind::Error } else { Kind::PostDir };
            self.cur = Some(parent);
            return Ok(Some(parent));
        }
    }

    /// Build the sibling chain of the current node's children.
    ///
    /// Returns the head of the chain, or `None` if the directory is empty
    /// or (in read mode) could not be opened, in which case the current
    /// node has been reclassified. Peek modes report open failures to the
    /// caller instead.
    fn build(&mut self, mode: BuildMode) -> io::Result<Option<EntryId>> {
        let cur = self.cur.expect("build requires a current node");

        // How many directories this node can still contain when the link
        // count arithmetic applies; 0 means stat nothing, negative means
        // stat everything. Filesystems that don't keep the traditional
        // count (nlink < 2) fall out as "stat everything" on their own.
        let mut nlinks: i64 = if mode == BuildMode::Names {
            0
        } else if self.options.contains(Options::NO_STAT)
            && self.options.contains(Options::PHYSICAL)
            && !self.options.contains(Options::LOGICAL)
        {
            let dots =
                if self.options.contains(Options::SEE_DOT) { 0 } else { 2 };
            self.arena[cur].nlink as i64 - dots
        } else {
            -1
        };

        // Readability was established at the pre-order visit, so failure
        // here is a race or descriptor exhaustion; it gets the same
        // treatment either way.
        let mut dir = match self.open_stream(cur) {
            Ok(dir) => dir,
            Err(err) => {
                if mode == BuildMode::Read {
                    let node = &mut self.arena[cur];
                    node.kind = Kind::UnreadableDir;
                    node.errno = raw_errno(&err);
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let level = self.arena[cur].level + 1;
        let base = append_at(&self.arena[cur], &self.path);
        let see_dot = self.options.contains(Options::SEE_DOT);
        let whiteouts = self.options.contains(Options::WHITEOUT);

        let mut head: Option<EntryId> = None;
        let mut tail: Option<EntryId> = None;
        let mut count = 0;
        let mut dent = os::DirEntry::empty();
        loop {
            match dir.read_into(&mut dent) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    // Enumeration died partway. Keep what was read; the
                    // error surfaces at this directory's post-order visit.
                    self.arena[cur].errno = raw_errno(&err);
                    break;
                }
            }
            let name = dent.file_name_bytes();
            if !see_dot && is_dot(name) {
                continue;
            }
            let whiteout = dent.is_whiteout();
            if whiteout && !whiteouts {
                continue;
            }

            let name_len = name.len();
            self.path.fit(base + 1 + name_len);
            let id = self.arena.alloc(
                dent.file_name_bytes(),
                Some(cur),
                level,
                base + 1 + name_len,
            );

            let hint = dent.file_type();
            let kind = if whiteout {
                self.probe(id, false, true)
            } else if nlinks == 0
                || (nlinks > 0 && matches!(hint, Some(ft) if !ft.is_dir()))
            {
                // The budget is spent, or the entry hint already rules out
                // a directory: no stat needed.
                Kind::NoStat
            } else {
                let kind = self.probe(id, false, false);
                if nlinks > 0
                    && matches!(kind, Kind::PreDir | Kind::Cycle | Kind::Dot)
                {
                    nlinks -= 1;
                }
                kind
            };
            self.arena[id].kind = kind;

            // Insertion order, so unsorted walks come out in readdir
            // order.
            match tail {
                Some(t) => self.arena[t].link = Some(id),
                None => head = Some(id),
            }
            tail = Some(id);
            count += 1;
        }
        drop(dir);

        if count == 0 {
            if mode == BuildMode::Read {
                let node = &mut self.arena[cur];
                node.kind = if node.errno != 0 {
                    Kind::Error
                } else {
                    Kind::PostDir
                };
            }
            return Ok(None);
        }

        let mut head = head.expect("non-empty chain has a head");
        if self.sorter.is_some() && count > 1 {
            head = self.sort_chain(head, count);
        }
        Ok(Some(head))
    }

    /// Secure directory access for an entry about to be surfaced as a
    /// pre-order visit. On failure the entry becomes a single
    /// [`Kind::UnreadableDir`] visit carrying the errno.
    ///
    /// Outside full-path mode the opened descriptor is retained on the
    /// node for the whole pre..post lifetime; children reach the kernel
    /// relative to it. In full-path mode the open is a readability check
    /// only.
    fn commit_pre_dir(&mut self, id: EntryId) {
        if self.arena[id].handle.is_some() {
            // Already secured; a revisit via Again lands here.
            return;
        }
        match self.open_dirfd(id) {
            Ok(fd) => {
                if !self.options.contains(Options::FULL_PATHS) {
                    self.arena[id].handle = Some(fd);
                }
            }
            Err(err) => {
                let node = &mut self.arena[id];
                node.kind = Kind::UnreadableDir;
                node.errno = raw_errno(&err);
            }
        }
    }

    /// Open a descriptor for an entry's directory, through the parent's
    /// handle when one is retained, otherwise by full path.
    fn open_dirfd(&self, id: EntryId) -> io::Result<DirFd> {
        let node = &self.arena[id];
        let parent_fd = node
            .parent
            .and_then(|pid| self.arena.get(pid))
            .and_then(|p| p.handle.as_ref());
        match parent_fd {
            Some(pfd) => DirFd::openat_c(pfd.as_raw_fd(), node.name_cstr()),
            None => DirFd::open_c(&self.full_cstring(id)?),
        }
    }

    /// Open a read stream for the current node's directory: a duplicate of
    /// the retained handle when there is one, a fresh open otherwise.
    fn open_stream(&self, cur: EntryId) -> io::Result<Dir> {
        let fd = match self.arena[cur].handle.as_ref() {
            Some(handle) => DirFd::duplicate(handle.as_raw_fd())?,
            None => self.open_dirfd(cur)?,
        };
        let mut dir = Dir::from_dirfd(fd)?;
        // A duplicated descriptor shares its read position with the
        // retained handle, and a prior enumeration (a children peek, say)
        // leaves that position at the end.
        dir.rewind();
        Ok(dir)
    }

    /// Classify an entry, filling its metadata slot and, for directories,
    /// its device, inode and link count.
    fn probe(&mut self, id: EntryId, follow: bool, whiteout: bool) -> Kind {
        if whiteout {
            // There is nothing behind a whiteout to stat.
            return Kind::Whiteout;
        }
        self.arena[id].cycle = None;
        let keep_stat = !self.options.contains(Options::NO_STAT);

        let md = if self.options.contains(Options::LOGICAL) || follow {
            match self.stat_node(id, true) {
                Ok(md) => md,
                Err(err) => {
                    return match self.stat_node(id, false) {
                        Ok(md) => {
                            // The link exists but its target doesn't.
                            // errno stays clear so this is not mistaken
                            // for a failed stat.
                            let node = &mut self.arena[id];
                            node.errno = 0;
                            node.stat =
                                if keep_stat { Some(md) } else { None };
                            Kind::BrokenSymlink
                        }
                        Err(_) => {
                            let node = &mut self.arena[id];
                            node.errno = raw_errno(&err);
                            node.stat = None;
                            Kind::StatFailed
                        }
                    };
                }
            }
        } else {
            match self.stat_node(id, false) {
                Ok(md) => md,
                Err(err) => {
                    let node = &mut self.arena[id];
                    node.errno = raw_errno(&err);
                    node.stat = None;
                    return Kind::StatFailed;
                }
            }
        };

        let ft = md.file_type();
        let kind = if ft.is_dir() {
            let (dev, ino, nlink) = (md.dev(), md.ino(), md.nlink());
            {
                let node = &mut self.arena[id];
                node.dev = dev;
                node.ino = ino;
                node.nlink = nlink;
            }
            if is_dot(self.arena[id].name_bytes()) {
                Kind::Dot
            } else {
                // Cycle detection is brute force over the parent chain,
                // once per directory. Trees deep enough for that to hurt
                // are rare.
                let mut hit = None;
                let mut next = self.arena[id].parent;
                while let Some(tid) = next {
                    let ancestor = &self.arena[tid];
                    if ancestor.level < ROOT_LEVEL {
                        break;
                    }
                    if ancestor.ino == ino && ancestor.dev == dev {
                        hit = Some(tid);
                        break;
                    }
                    next = ancestor.parent;
                }
                match hit {
                    Some(tid) => {
                        self.arena[id].cycle = Some(tid);
                        Kind::Cycle
                    }
                    None => Kind::PreDir,
                }
            }
        } else if ft.is_symlink() {
            Kind::Symlink
        } else if ft.is_file() {
            Kind::File
        } else {
            Kind::Other
        };
        self.arena[id].stat = if keep_stat { Some(md) } else { None };
        kind
    }

    /// Stat an entry through its parent's handle when one is retained,
    /// otherwise by its full path.
    fn stat_node(&self, id: EntryId, deref: bool) -> io::Result<Metadata> {
        let node = &self.arena[id];
        if let Some(parent) =
            node.parent.and_then(|pid| self.arena.get(pid))
        {
            if let Some(ref fd) = parent.handle {
                let name = node.name_cstr();
                return if deref {
                    stat::statat_c(fd.as_raw_fd(), name)
                } else {
                    stat::lstatat_c(fd.as_raw_fd(), name)
                };
            }
        }
        let path = self.full_cstring(id)?;
        if deref {
            stat::stat_c(&path)
        } else {
            stat::lstat_c(&path)
        }
    }

    fn full_cstring(&self, id: EntryId) -> io::Result<CString> {
        Ok(CString::new(full_path_bytes(&self.arena, &self.path, id))?)
    }

    /// Start the next root: the path buffer becomes the root's argument,
    /// the name keeps only its final component, and the device pin moves.
    fn load_root(&mut self, id: EntryId) {
        let full = self.arena[id].name_bytes().to_vec();
        self.path.load(&full);
        {
            let node = &mut self.arena[id];
            node.path_len = full.len();
            if let Some(pos) = full.iter().rposition(|&b| b == b'/') {
                // A lone "/" keeps its name; anything else is trimmed to
                // what follows the last slash.
                if pos != 0 || full.len() > 1 {
                    node.set_name(&full[pos + 1..]);
                }
            }
        }
        self.dev = self.arena[id].dev;
    }

    fn free_pending(&mut self) {
        let mut next = self.pending.take();
        while let Some(id) = next {
            next = self.arena[id].link;
            self.arena.release(id);
        }
        self.pending_names_only = false;
    }

    /// Re-link a sibling chain in the order induced by the sorter. The
    /// scratch vector grows once and is reused for every batch.
    fn sort_chain(&mut self, head: EntryId, count: usize) -> EntryId {
        {
            let Walk {
                ref arena,
                ref path,
                ref mut sorter,
                ref mut scratch,
                ..
            } = *self;
            let sorter = sorter.as_mut().expect("sort_chain requires a sorter");
            scratch.clear();
            let mut next = Some(head);
            while let Some(id) = next {
                scratch.push(id);
                next = arena[id].link;
            }
            debug_assert_eq!(scratch.len(), count);
            scratch.sort_by(|&a, &b| {
                (**sorter)(
                    &Entry { arena, buf: path, id: a },
                    &Entry { arena, buf: path, id: b },
                )
            });
        }
        for i in 0..self.scratch.len() - 1 {
            let (a, b) = (self.scratch[i], self.scratch[i + 1]);
            self.arena[a].link = Some(b);
        }
        let last = *self.scratch.last().expect("non-empty scratch");
        self.arena[last].link = None;
        self.scratch[0]
    }
}

/// A view of one entry in the stream.
///
/// Entries borrow the walk, so a previously returned entry must be dropped
/// before the walk is driven again; copy out its [`Entry::id`] to refer to
/// it afterwards (e.g. for [`Walk::set_instruction`]).
pub struct Entry<'a> {
    arena: &'a Arena,
    buf: &'a PathBuffer,
    id: EntryId,
}

impl<'a> Entry<'a> {
    fn node(&self) -> &'a crate::entry::Node {
        &self.arena[self.id]
    }

    /// The stable id of this entry.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// How this entry was classified at this visit.
    pub fn kind(&self) -> Kind {
        self.node().kind
    }

    /// Depth below the roots: roots are level 0, their children level 1,
    /// and so on.
    pub fn level(&self) -> i32 {
        self.node().level
    }

    /// The final path component. For a root this is the final component of
    /// the argument once the root has been visited.
    pub fn file_name(&self) -> &'a OsStr {
        OsStr::from_bytes(self.node().name_bytes())
    }

    /// The final path component as raw bytes.
    pub fn file_name_bytes(&self) -> &'a [u8] {
        self.node().name_bytes()
    }

    /// The entry's full path, from the root argument it was reached
    /// through.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(OsString::from_vec(full_path_bytes(
            self.arena, self.buf, self.id,
        )))
    }

    /// The entry's metadata, when a stat succeeded and
    /// [`Options::NO_STAT`] is off. Entries of kind [`Kind::NoStat`],
    /// [`Kind::StatFailed`] and [`Kind::Whiteout`] have none.
    pub fn metadata(&self) -> Option<&'a Metadata> {
        self.node().stat.as_ref()
    }

    /// The error associated with this entry, for the kinds that carry one
    /// ([`Kind::UnreadableDir`], [`Kind::StatFailed`], [`Kind::Error`]).
    pub fn io_error(&self) -> Option<io::Error> {
        match self.node().errno {
            0 => None,
            errno => Some(io::Error::from_raw_os_error(errno)),
        }
    }

    /// For a [`Kind::Cycle`] entry, the ancestor it collided with.
    pub fn cycle(&self) -> Option<Entry<'a>> {
        let target = self.node().cycle?;
        Some(Entry { arena: self.arena, buf: self.buf, id: target })
    }

    /// The device this entry is on. Only meaningful for directory kinds.
    pub fn dev(&self) -> u64 {
        self.node().dev
    }

    /// The entry's inode. Only meaningful for directory kinds.
    pub fn ino(&self) -> u64 {
        self.node().ino
    }

    /// The entry's hard link count. Only meaningful for directory kinds.
    pub fn nlink(&self) -> u64 {
        self.node().nlink
    }

    /// The caller-owned scratch number, set with [`Walk::set_number`].
    pub fn number(&self) -> u64 {
        self.node().number
    }
}

impl<'a> fmt::Debug for Entry<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry")
            .field("kind", &self.kind())
            .field("level", &self.level())
            .field("path", &self.path())
            .finish()
    }
}

/// Iterator over the entries returned by [`Walk::children`].
#[derive(Debug)]
pub struct Children<'a> {
    arena: &'a Arena,
    buf: &'a PathBuffer,
    next: Option<EntryId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Entry<'a>> {
        let id = self.next?;
        self.next = self.arena[id].link;
        Some(Entry { arena: self.arena, buf: self.buf, id })
    }
}

fn raw_errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EINVAL)
}

fn stale_id() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "stale or unknown entry id")
}
