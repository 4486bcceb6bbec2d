mod archival_pipeline;
mod archive_writer;
mod queue_consumer;

pub use archival_pipeline::*;
pub use archive_writer::*;
pub use queue_consumer::*;
