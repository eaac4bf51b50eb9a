#[macro_use]
pub(crate) mod util;

mod walk;
