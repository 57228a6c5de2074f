pub mod capture;
pub mod dispatcher;
pub mod queue;
pub mod rewrite;
pub mod stats;
pub mod worker;

pub use capture::{CaptureError, CapturedJob, ROUTING_HEADER};
pub use dispatcher::{Dispatcher, PoolSummary};
pub use queue::{JobQueue, QueueError};
pub use rewrite::{OutboundRequest, RewriteError, build_outbound};
pub use stats::{StatsRegister, StatsSnapshot};
pub use worker::{DispatchWorker, WorkerState, WorkerStatus};
