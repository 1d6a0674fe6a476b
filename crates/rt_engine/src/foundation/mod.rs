//! Foundation utilities shared by every engine layer

pub mod logging;
pub mod math;
pub mod report;
pub mod time;
