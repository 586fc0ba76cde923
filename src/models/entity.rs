// Servers and plugins share one entity table; plugin-only fields are empty for servers.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity kind; stored and serialized lowercase ("server", "plugin").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Server,
    Plugin,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Server => "server",
            EntityKind::Plugin => "plugin",
        }
    }

    /// Parse the stored column value. Unknown values are treated as plugins.
    pub fn from_db(s: &str) -> Self {
        match s {
            "server" => EntityKind::Server,
            _ => EntityKind::Plugin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub author: String,
    pub hidden: bool,
    /// Monotonic; bumped once per submission referencing this plugin.
    pub global_hits: i64,
}
