pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use crate::adapters::{CtfClient, LocalStorage};
pub use crate::config::{ClientSettings, ProbeConfig};
pub use crate::core::fanout::FanOut;
pub use crate::utils::error::{ProbeError, Result};
