//! Foundation utilities shared by every layer

pub mod logging;
pub mod math;
pub mod hash;
