//! Common data types shared across collaborators

pub mod actor;
pub mod job;
pub mod visibility;
pub mod vm;

pub use actor::*;
pub use job::*;
pub use visibility::*;
pub use vm::*;
