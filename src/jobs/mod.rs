pub mod lease;
pub mod monitor;
pub mod record;
pub mod registry;

pub use lease::Lease;
pub use monitor::{LeaseMonitor, MonitorMode};
pub use record::{JobRecord, JobSpec, JobStatus, JobSummary};
pub use registry::JobRegistry;
