use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An address exempt from suppression/denylist policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListEntry {
    pub email: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an allow-list add. `added` reports that the operation succeeded,
/// not that the address was newly inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowListAddition {
    pub added: bool,
    pub entry: AllowListEntry,
}

/// Result of an allow-list removal. `deleted == false` means the address was
/// not on the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListRemoval {
    pub email: String,
    pub deleted: bool,
}
