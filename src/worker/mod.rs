//! Running units of work against open jobs.
//!
//! - [`Executor`]: synchronous and deadline-bounded execution on an open job
//! - [`BatchRunner`]: open, run and close a job within one request
//! - [`heartbeat`]: open-job counter and the liveness heartbeat it gates
//!
//! # Execution Flow
//!
//! 1. The executor looks the job up and checks its workload is still open
//! 2. Remote (http) scripts are downloaded
//! 3. The workload runs the unit of work and returns result values
//! 4. Workload failures surface as `ExecutionFailure` with the message intact

pub mod batch;
pub mod executor;
pub mod heartbeat;

pub use batch::BatchRunner;
pub use executor::Executor;
pub use heartbeat::{HeartbeatSender, LivenessTracker};
