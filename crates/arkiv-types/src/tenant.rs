use serde::{Deserialize, Serialize};

/// A tenant of the archiving platform.
///
/// Every container is owned by exactly one tenant; the tenant number is part
/// of the container name, so data from distinct tenants never shares a
/// directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tenant(pub u32);

impl Tenant {
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Tenant {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
