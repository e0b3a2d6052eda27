//! Events pushed to subscribers.
//!
//! Wire format is a flat JSON object tagged by `event`:
//!
//! ```json
//! {"event":"new_upload","data":{...}}
//! {"event":"in_progress","sha256":"..."}
//! {"event":"ack_rating","sha256":"...","status":"success"}
//! ```

use crate::storage::ClassifiedItem;
use serde::{Deserialize, Serialize};

pub const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    /// A new item was classified and stored
    NewUpload { data: ClassifiedItem },
    /// A review action on `sha256` has started
    InProgress { sha256: String },
    /// A label change was applied
    AckRating { sha256: String, status: String },
    /// An item was deleted
    AckDelete { sha256: String, status: String },
}

impl HubEvent {
    pub fn in_progress(sha256: impl Into<String>) -> Self {
        Self::InProgress {
            sha256: sha256.into(),
        }
    }

    pub fn ack_rating(sha256: impl Into<String>) -> Self {
        Self::AckRating {
            sha256: sha256.into(),
            status: STATUS_SUCCESS.to_string(),
        }
    }

    pub fn ack_delete(sha256: impl Into<String>) -> Self {
        Self::AckDelete {
            sha256: sha256.into(),
            status: STATUS_SUCCESS.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NewUpload { .. } => "new_upload",
            Self::InProgress { .. } => "in_progress",
            Self::AckRating { .. } => "ack_rating",
            Self::AckDelete { .. } => "ack_delete",
        }
    }
}
