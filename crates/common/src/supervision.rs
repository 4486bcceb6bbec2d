mod fault_reporter;

pub use fault_reporter::*;
