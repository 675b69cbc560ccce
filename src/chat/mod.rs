//! Chat sessions and the stateless chat facade.

mod session;
mod util;

pub use session::*;
pub use util::*;

#[cfg(test)]
pub(crate) use session::testing;
