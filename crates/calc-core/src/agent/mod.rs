//! The agent pool: a fixed number of in-process workers that execute
//! arithmetic operations concurrently, bounded by `CALC_COMPUTING_POWER`.

mod executor;
mod pool;
mod storage;
mod types;
mod worker;

pub use executor::{Executor, LatencyTable, LocalExecutor};
pub use pool::AgentPool;
pub use storage::AgentStorage;
pub use types::{AgentJob, AgentSnapshot, AgentStatus};
