//! Azure OpenAI client module.

mod azure;
mod factory;
mod responses;

pub use azure::*;
pub use factory::*;
pub use responses::*;
