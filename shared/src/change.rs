//! Change records: the only unit of cross-peer communication about state

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A property bag. Values are arbitrary JSON so bindings can carry whatever
/// payload they need (positions, geometry descriptions, ...).
pub type Properties = serde_json::Map<String, Value>;

/// Anything that can be judged by an ownership filter
pub trait Owned {
    fn id(&self) -> &str;
    fn owner(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Update => "update",
            ChangeKind::Remove => "remove",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "add" => Some(ChangeKind::Add),
            "update" => Some(ChangeKind::Update),
            "remove" => Some(ChangeKind::Remove),
            _ => None,
        }
    }
}

/// An add/update/remove notification about one object.
///
/// `Add` carries the full property set, `Update` only the changed keys.
/// Updates produced by a world always carry the owner; hand-built ones may not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeRecord {
    Add {
        id: String,
        owner: String,
        properties: Properties,
    },
    Update {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        properties: Properties,
    },
    Remove {
        id: String,
        owner: String,
    },
}

impl ChangeRecord {
    pub fn add(id: impl Into<String>, owner: impl Into<String>, properties: Properties) -> Self {
        ChangeRecord::Add {
            id: id.into(),
            owner: owner.into(),
            properties,
        }
    }

    pub fn update(id: impl Into<String>, owner: Option<String>, properties: Properties) -> Self {
        ChangeRecord::Update {
            id: id.into(),
            owner,
            properties,
        }
    }

    pub fn remove(id: impl Into<String>, owner: impl Into<String>) -> Self {
        ChangeRecord::Remove {
            id: id.into(),
            owner: owner.into(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeRecord::Add { .. } => ChangeKind::Add,
            ChangeRecord::Update { .. } => ChangeKind::Update,
            ChangeRecord::Remove { .. } => ChangeKind::Remove,
        }
    }

    pub fn properties(&self) -> Option<&Properties> {
        match self {
            ChangeRecord::Add { properties, .. } | ChangeRecord::Update { properties, .. } => {
                Some(properties)
            }
            ChangeRecord::Remove { .. } => None,
        }
    }

    pub fn properties_mut(&mut self) -> Option<&mut Properties> {
        match self {
            ChangeRecord::Add { properties, .. } | ChangeRecord::Update { properties, .. } => {
                Some(properties)
            }
            ChangeRecord::Remove { .. } => None,
        }
    }
}

impl Owned for ChangeRecord {
    fn id(&self) -> &str {
        match self {
            ChangeRecord::Add { id, .. }
            | ChangeRecord::Update { id, .. }
            | ChangeRecord::Remove { id, .. } => id,
        }
    }

    fn owner(&self) -> Option<&str> {
        match self {
            ChangeRecord::Add { owner, .. } | ChangeRecord::Remove { owner, .. } => Some(owner),
            ChangeRecord::Update { owner, .. } => owner.as_deref(),
        }
    }
}

/// Shallow merge: keys in `incoming` overwrite, nothing is ever removed
pub fn merge_properties(target: &mut Properties, incoming: &Properties) {
    for (key, value) in incoming {
        target.insert(key.clone(), value.clone());
    }
}
