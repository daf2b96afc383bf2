//! Conflict Resolution for Progress Uploads
//!
//! Two devices can write progress for the same book. The resolver decides
//! whether a pending local write still goes to the server.
//!
//! ## Policies
//!
//! - **TrustServer**: upload without looking. The server keeps its own
//!   history and the last upload wins there.
//! - **PreReadCompare**: fetch server progress first and keep whichever side
//!   was written last.
//!
//! Comparison is always by timestamp. A position further into the book does
//! not win on its own: the listener may have rewound on purpose.

use bridge_traits::server::RemoteProgress;
use core_library::models::ProgressRecord;
use serde::{Deserialize, Serialize};

/// Conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Upload without a pre-read
    #[default]
    TrustServer,

    /// Read server progress first and keep the newer side
    PreReadCompare,
}

/// Outcome of comparing a local record against the server
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Local write is newer or the server has nothing; upload it.
    UploadLocal,

    /// Server write is newer; adopt it locally and skip the upload.
    KeepServer(RemoteProgress),
}

/// Stateless resolver for a configured policy
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Whether uploads must fetch server progress first.
    pub fn needs_server_read(&self) -> bool {
        self.policy == ConflictPolicy::PreReadCompare
    }

    /// Decide between the local record and server progress.
    ///
    /// Ties go to the local record.
    pub fn resolve(&self, local: &ProgressRecord, server: Option<&RemoteProgress>) -> Resolution {
        if self.policy == ConflictPolicy::TrustServer {
            return Resolution::UploadLocal;
        }

        match server {
            Some(server) if server.last_update > local.local_updated_at => {
                Resolution::KeepServer(server.clone())
            }
            _ => Resolution::UploadLocal,
        }
    }
}

/// Local record mirroring server progress, already synced.
pub fn adopt_server(server: &RemoteProgress) -> ProgressRecord {
    let mut record = ProgressRecord::new(
        server.item_id.clone(),
        server.position.max(0.0),
        server.duration.max(0.0),
        server.last_update,
    )
    .finished(server.is_finished);
    record.synced = true;
    record
}
