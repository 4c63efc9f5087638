pub mod allowlist;
pub mod artifact;
pub mod job_store;
pub mod limiter;
pub mod poller;
pub mod remote;
pub mod retention;
pub mod retry;
pub mod scheduler;
pub mod submitter;
pub mod transport;
pub mod validation;

pub use allowlist::{AllowListListing, AllowListManager};
pub use artifact::{Artifact, ArtifactResolver};
pub use job_store::JobStore;
pub use limiter::{LimiterStats, RequestLimiter};
pub use poller::Poller;
pub use remote::ExportApi;
pub use retention::{RetentionService, SweepReport};
pub use scheduler::PollScheduler;
pub use submitter::{AccountExportParams, ActivityExportParams, ExportRequest, JobSubmitter};
pub use transport::{Endpoint, ExportTransport, TransportFailure};
pub use validation::InputValidator;
