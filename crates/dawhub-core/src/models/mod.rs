//! Domain models: projects and the files they own.

mod file;
mod project;

pub use file::*;
pub use project::*;
