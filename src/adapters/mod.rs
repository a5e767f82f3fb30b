// Adapters layer: concrete implementations for external systems (the platform's REST API, local files).

pub mod http;
pub mod storage;

pub use http::{ApiResponse, AuthStyle, CtfClient};
pub use storage::LocalStorage;
