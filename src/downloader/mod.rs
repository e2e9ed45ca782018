pub mod destination;
pub mod engine;
pub mod error;
pub mod manager;
pub mod pool;
pub mod store;
pub mod task;
pub mod task_slot_pool;

pub use destination::{resolve_destination, validate_filename};
pub use engine::{DownloadOutcome, Downloader, LuxDownloader};
pub use error::{JobError, JobResult};
pub use manager::{JobManager, JobSummary, ManagerSettings};
pub use pool::{Admission, ExecutionPool};
pub use store::{JobCounts, JobStore};
pub use task::{DownloadJob, JobStatus};
pub use task_slot_pool::{TaskSlot, TaskSlotPool};
