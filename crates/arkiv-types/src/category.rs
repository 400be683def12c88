use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tenant::Tenant;

/// The kind of data held by a container.
///
/// The category decides the mutability policy of objects stored under it:
/// write-once (WORM) categories reject rewrites with different content,
/// mutable categories allow replacement. It also decides whether objects may
/// be deleted at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Binary archive objects. Write-once, deletable only via elimination.
    Object,
    /// Archival unit metadata backups. Rewritable (each save replaces the
    /// previous snapshot), deletable.
    Unit,
    /// Object-group metadata backups. Rewritable, deletable.
    ObjectGroup,
    /// Precomputed unit graph archives. Write-once, deletable.
    UnitGraph,
    /// Precomputed object-group graph archives. Write-once, deletable.
    ObjectGroupGraph,
    /// Platform backup artifacts (database dumps, sequence snapshots).
    /// Rewritable, never deletable.
    Backup,
    /// Generated reports. Write-once, deletable.
    Report,
}

impl DataCategory {
    /// All categories, for iteration in audits and tests.
    pub const ALL: [DataCategory; 7] = [
        DataCategory::Object,
        DataCategory::Unit,
        DataCategory::ObjectGroup,
        DataCategory::UnitGraph,
        DataCategory::ObjectGroupGraph,
        DataCategory::Backup,
        DataCategory::Report,
    ];

    /// Whether an existing object under this category may be replaced with
    /// different content. `false` means write-once (WORM).
    pub fn can_rewrite(&self) -> bool {
        matches!(
            self,
            DataCategory::Unit | DataCategory::ObjectGroup | DataCategory::Backup
        )
    }

    /// Whether objects under this category may be deleted.
    pub fn can_delete(&self) -> bool {
        !matches!(self, DataCategory::Backup)
    }

    /// Short folder name used in container names and CLI arguments.
    pub fn folder(&self) -> &'static str {
        match self {
            DataCategory::Object => "object",
            DataCategory::Unit => "unit",
            DataCategory::ObjectGroup => "objectgroup",
            DataCategory::UnitGraph => "unitgraph",
            DataCategory::ObjectGroupGraph => "objectgroupgraph",
            DataCategory::Backup => "backup",
            DataCategory::Report => "report",
        }
    }

    /// The container holding this category's objects for the given tenant.
    pub fn container_name(&self, tenant: Tenant) -> String {
        format!("{}_{}", tenant, self.folder())
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder())
    }
}

impl std::str::FromStr for DataCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DataCategory::ALL
            .iter()
            .copied()
            .find(|c| c.folder() == s)
            .ok_or_else(|| Error::illegal_argument(format!("unknown data category '{s}'")))
    }
}
