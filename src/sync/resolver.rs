//! Conflict Resolution for Offline Sync
//!
//! Merges locally pending records against the changes the server reported
//! since the last cycle. A conflict is any id present on both sides; it is
//! always reported, whichever side wins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::record::{EntityKind, Record, SyncStatus};
use crate::error::SyncError;

/// Policy used to pick a winner when both sides changed a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Newest `updatedAt` wins, ties go to the server
    #[default]
    Smart,
    /// Local edit always wins and is still owed a push
    Local,
    /// Server version always wins
    Server,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Smart => "smart",
            Strategy::Local => "local",
            Strategy::Server => "server",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smart" => Ok(Strategy::Smart),
            "local" => Ok(Strategy::Local),
            "server" => Ok(Strategy::Server),
            _ => Err(SyncError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Which side a conflict was resolved in favour of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Server,
}

/// Same id changed locally and on the server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub entity_type: EntityKind,
    pub local: Record,
    pub server: Record,
    pub winner: Winner,
}

impl Conflict {
    pub fn id(&self) -> &str {
        &self.local.id
    }
}

/// Output of [`resolve_conflicts`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Records to write back, ordered by id
    pub merged: Vec<Record>,
    pub conflicts: Vec<Conflict>,
}

/// Merge pending local records with server changes.
///
/// Deterministic and free of I/O:
/// - ids on both sides produce a [`Conflict`] and the strategy's winner;
/// - server-only ids pass through as `Synced`;
/// - local-only ids pass through unchanged.
pub fn resolve_conflicts(
    entity_type: EntityKind,
    pending_local: Vec<Record>,
    server_changes: Vec<Record>,
    strategy: Strategy,
) -> Resolution {
    let mut local: BTreeMap<String, Record> = pending_local
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();
    let server: BTreeMap<String, Record> = server_changes
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

    let mut merged = BTreeMap::new();
    let mut conflicts = Vec::new();

    for (id, server_record) in server {
        match local.remove(&id) {
            Some(local_record) => {
                let winner = pick_winner(&local_record, &server_record, strategy);
                let resolved = match winner {
                    Winner::Local => local_record.clone(),
                    Winner::Server => server_record.clone().synced(),
                };
                conflicts.push(Conflict {
                    entity_type,
                    local: local_record,
                    server: server_record,
                    winner,
                });
                merged.insert(id, resolved);
            }
            None => {
                merged.insert(id, server_record.synced());
            }
        }
    }

    merged.extend(local);

    Resolution {
        merged: merged.into_values().collect(),
        conflicts,
    }
}

fn pick_winner(local: &Record, server: &Record, strategy: Strategy) -> Winner {
    match strategy {
        Strategy::Local => Winner::Local,
        Strategy::Server => Winner::Server,
        Strategy::Smart => {
            if local.updated_at > server.updated_at {
                Winner::Local
            } else {
                Winner::Server
            }
        }
    }
}

impl Resolution {
    /// Merged records that no longer owe a push
    pub fn synced_count(&self) -> usize {
        self.merged
            .iter()
            .filter(|r| r.sync_status == SyncStatus::Synced)
            .count()
    }
}
