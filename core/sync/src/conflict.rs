//! Conflict detection and resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use inkpad_common::{Record, RecordId};

/// How a local and a remote snapshot relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divergence {
    /// Same content; timestamps may differ.
    Equivalent,
    /// Only the local side changed since the last sync.
    LocalAhead,
    /// Only the remote side changed since the last sync.
    RemoteAhead,
    /// Both sides changed, or there is no common sync point.
    Diverged,
}

/// Classify a local/remote pair against the last common sync time.
///
/// A pair that never synced and differs in content is `Diverged`, as is one
/// where neither side moved past `last_synced` yet the content differs.
pub fn classify(
    local: &Record,
    remote: &Record,
    last_synced: Option<DateTime<Utc>>,
) -> Divergence {
    if local.content_eq(remote) {
        return Divergence::Equivalent;
    }

    let Some(synced) = last_synced else {
        return Divergence::Diverged;
    };

    match (local.updated_at() > synced, remote.updated_at() > synced) {
        (true, false) => Divergence::LocalAhead,
        (false, true) => Divergence::RemoteAhead,
        _ => Divergence::Diverged,
    }
}

/// Resolution state of a conflict artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictState {
    Unresolved,
    ResolvedLocal,
    ResolvedRemote,
}

/// Which side of a conflict survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
}

impl Resolution {
    fn resolved_state(self) -> ConflictState {
        match self {
            Resolution::Local => ConflictState::ResolvedLocal,
            Resolution::Remote => ConflictState::ResolvedRemote,
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = inkpad_common::Error;

    fn from_str(s: &str) -> inkpad_common::Result<Self> {
        match s {
            "local" => Ok(Resolution::Local),
            "remote" => Ok(Resolution::Remote),
            other => Err(inkpad_common::Error::InvalidInput(format!(
                "Unknown resolution '{}', expected 'local' or 'remote'",
                other
            ))),
        }
    }
}

/// Two independently modified snapshots of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub local_record: Record,
    pub remote_record: Record,
    pub detected_at: DateTime<Utc>,
    pub state: ConflictState,
}

impl SyncConflict {
    pub fn new(local_record: Record, remote_record: Record) -> Self {
        Self {
            local_record,
            remote_record,
            detected_at: Utc::now(),
            state: ConflictState::Unresolved,
        }
    }

    pub fn id(&self) -> &RecordId {
        self.local_record.id()
    }

    pub fn is_resolved(&self) -> bool {
        self.state != ConflictState::Unresolved
    }

    /// The snapshot `resolution` keeps.
    pub fn chosen(&self, resolution: Resolution) -> &Record {
        match resolution {
            Resolution::Local => &self.local_record,
            Resolution::Remote => &self.remote_record,
        }
    }

    pub(crate) fn into_resolved(mut self, resolution: Resolution) -> Self {
        self.state = resolution.resolved_state();
        self
    }
}

/// Decides conflicts on behalf of the user.
pub trait ConflictResolver: Send + Sync {
    fn decide(&self, conflict: &SyncConflict) -> Resolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&SyncConflict) -> Resolution + Send + Sync,
{
    fn decide(&self, conflict: &SyncConflict) -> Resolution {
        self(conflict)
    }
}
