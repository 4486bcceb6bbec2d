pub mod archive_worker;
pub mod domain;

pub use archive_worker::*;
pub use domain::*;
