mod archive_reader;
mod binary_encoder;
mod error;

pub use archive_reader::*;
pub use binary_encoder::*;
pub use error::*;
