mod batch_accumulator;
mod ingestion_handle;
mod ingestion_pipeline;

pub use batch_accumulator::*;
pub use ingestion_handle::*;
pub use ingestion_pipeline::*;
