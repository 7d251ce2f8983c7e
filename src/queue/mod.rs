pub mod admission;
pub mod job;

pub use admission::{Admission, AdmissionQueue, QueueStats, UserQueueStats};
pub use job::{JobId, JobPriority, JobRequest, JobStatus, QueuedEntry};
