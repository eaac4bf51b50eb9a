/// The one path buffer shared by every live entry in a walk.
///
/// The buffer always holds the full path of the current cursor; the paths of
/// the cursor's ancestors are prefixes of it. Entries record lengths into
/// the buffer rather than pointers, so growing it never invalidates
/// anything.
#[derive(Debug)]
pub(crate) struct PathBuffer {
    buf: Vec<u8>,
}

impl PathBuffer {
    /// Create a buffer with room for at least `cap` bytes.
    pub(crate) fn with_capacity(cap: usize) -> PathBuffer {
        PathBuffer { buf: Vec::with_capacity(cap + 256) }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Make sure `total` bytes of path fit without reallocating in the
    /// middle of an append. Growth over-shoots by 256 bytes so wide
    /// directories don't grow the buffer a couple of bytes at a time.
    /// Capacity never shrinks during a walk.
    pub(crate) fn fit(&mut self, total: usize) {
        if total > self.buf.capacity() {
            self.buf.reserve(total - self.buf.len() + 256);
        }
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Replace the buffer contents with a root argument.
    pub(crate) fn load(&mut self, path: &[u8]) {
        self.buf.clear();
        self.fit(path.len());
        self.buf.extend_from_slice(path);
    }

    /// Truncate to the append point `at` and append `/name`.
    ///
    /// `at` comes from [`crate::entry::append_at`], which is zero for a
    /// root of `/` so the result is `/name` and never `//name`.
    pub(crate) fn set_name(&mut self, at: usize, name: &[u8]) {
        self.buf.truncate(at);
        self.fit(at + 1 + name.len());
        self.buf.push(b'/');
        self.buf.extend_from_slice(name);
    }
}
