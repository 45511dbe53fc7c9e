//! Request classification and single-target routing.

mod classifier;
mod policy;

pub use classifier::*;
pub use policy::*;
