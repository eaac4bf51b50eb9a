/*!
Depth-first directory traversal with pre- and post-order visits.

This crate walks one or more directory hierarchies and hands back every
entry it meets as a stream of visit events, in the tradition of the
`fts(3)` family behind `ls -R`, `find` and `rm -r`. What sets it apart from
a plain recursive iterator:

* **Two visits per directory.** A directory is returned once *before* any
  of its contents ([`Kind::PreDir`]) and once *after* all of them
  ([`Kind::PostDir`]), so callers can both prepare on the way down and
  finish up (accumulate sizes, fix permissions, delete) on the way up.
* **Cycle-safe symlink handling.** Physical walks treat links as leaves;
  logical walks follow them and report any directory that is its own
  ancestor as [`Kind::Cycle`] instead of looping.
* **Handle-relative syscalls.** Each directory being visited keeps an open
  descriptor, so children are reached with `openat`/`fstatat` by bare name.
  Syscalls stay cheap at any depth and paths longer than `PATH_MAX` still
  walk; when a handle can't be had, the engine falls back to full paths.
* **Stat elision.** Under [`Options::NO_STAT`], directory entry type hints
  and the parent's link count are used to skip metadata calls that can't
  matter, which removes most of the stat traffic in wide leaf directories.
* **A per-entry instruction channel.** While the walk is in progress the
  caller can tell it to skip a subtree, follow a symlink, or revisit an
  entry ([`Walk::set_instruction`]).

# Example

Walk a tree and total up the regular file bytes under each top-level
directory:

```no_run
use treewalk::{Kind, Options, Walk};

fn main() -> std::io::Result<()> {
    let mut walk = Walk::open(&["."], Options::PHYSICAL, None)?;
    let mut total = 0u64;
    while let Some(ent) = walk.read()? {
        match ent.kind() {
            Kind::File => {
                total += ent.metadata().map_or(0, |md| md.len());
            }
            Kind::PostDir if ent.level() == 0 => {
                println!("{}\t{}", total, ent.path().display());
                total = 0;
            }
            _ => {}
        }
    }
    Ok(())
}
```

Errors during the walk are not fatal: an unreadable directory comes back as
[`Kind::UnreadableDir`], a failed stat as [`Kind::StatFailed`], each
carrying its errno ([`Entry::io_error`]), and the walk moves on.

A [`Walk`] uses no global state and never changes the working directory,
but it is a strictly sequential, blocking object: drive it from one thread
at a time.
*/

#![cfg_attr(not(unix), allow(unused))]

#[cfg(not(unix))]
compile_error!("treewalk only supports Unix platforms");

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

mod entry;
mod os;
mod path;
mod walk;

#[cfg(test)]
mod tests;

pub use crate::entry::{EntryId, Kind, ROOT_LEVEL, ROOT_PARENT_LEVEL};
pub use crate::os::unix::{FileType, Metadata};
pub use crate::walk::{Children, Entry, Instruction, Options, Sorter, Walk};
