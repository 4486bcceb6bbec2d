mod buffer;
mod codec;
mod domain;
mod garde;
mod memory;
mod postgres;
mod supervision;
pub mod telemetry;

pub use buffer::*;
pub use codec::*;
pub use domain::*;
pub use garde::*;
pub use memory::*;
pub use postgres::*;
pub use supervision::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDequeueBroker;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDequeueTransaction;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockQueuePublisher;
