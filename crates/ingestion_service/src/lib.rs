pub mod domain;
pub mod ingestion_service;
pub mod tap_generator;

pub use domain::*;
pub use ingestion_service::*;
pub use tap_generator::*;
