mod in_memory_broker;

pub use in_memory_broker::*;
