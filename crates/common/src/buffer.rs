mod bounded_queue;
mod ring_buffer;

pub use bounded_queue::*;
pub use ring_buffer::*;
