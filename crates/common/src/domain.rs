mod queue;
mod result;
mod tap_event;
mod tap_request;

pub use queue::*;
pub use result::*;
pub use tap_event::*;
pub use tap_request::*;
