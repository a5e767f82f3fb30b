// Domain layer: records exchanged between the scripts and the ports their adapters implement.

pub mod model;
pub mod ports;
