/*!
Low level platform specific APIs for reading directory entries.
*/

#[cfg(unix)]
pub(crate) mod unix;
