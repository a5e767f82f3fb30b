pub mod fanout;
pub mod stats;

pub use crate::domain::model::{Outcome, SubmitVerdict, TaskResult};
pub use crate::domain::ports::{ConfigProvider, RetryPolicy, Storage};
pub use crate::utils::error::Result;
pub use fanout::{FanOut, FanOutReport, FanOutTask};
pub use stats::{LatencySummary, OutcomeTally, VerdictTally};
