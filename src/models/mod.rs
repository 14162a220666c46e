pub mod proxy;
pub mod usage;

pub use proxy::*;
pub use usage::*;
