pub mod allowlist;
pub mod job;
pub mod wire;

pub use allowlist::{AllowListAddition, AllowListEntry, AllowListRemoval};
pub use job::{AccountExportId, ExportJob, JobId, JobKind, JobRecord, JobState, TransactionalJobId};
