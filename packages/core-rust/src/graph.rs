//! Graph records: entities, edges, and the tags attached to both.
//!
//! These are the rows the repository stores. Identifiers are opaque strings
//! assigned by the repository implementation; timestamps are UTC millis and
//! `last_seen` is refreshed on re-observation, never moved backwards.

use serde::{Deserialize, Serialize};

use crate::assets::Asset;
use crate::property::Property;
use crate::relation::Relation;
use crate::time::UnixMillis;

/// A stored asset with its temporal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Opaque identifier assigned by the repository.
    pub id: String,
    /// The typed asset value.
    pub asset: Asset,
    /// When this entity was first created.
    pub created_at: UnixMillis,
    /// When this entity was last observed. Monotonically non-decreasing.
    pub last_seen: UnixMillis,
}

/// A stored directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Opaque identifier assigned by the repository.
    pub id: String,
    /// The typed relation this edge carries.
    pub relation: Relation,
    /// Identifier of the source entity.
    pub from_entity: String,
    /// Identifier of the destination entity.
    pub to_entity: String,
    pub created_at: UnixMillis,
    pub last_seen: UnixMillis,
}

/// A property attached to an entity, with its own temporal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTag {
    pub id: String,
    pub property: Property,
    /// Identifier of the entity this tag is attached to.
    pub entity_id: String,
    pub created_at: UnixMillis,
    pub last_seen: UnixMillis,
}

/// A property attached to an edge, with its own temporal window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTag {
    pub id: String,
    pub property: Property,
    /// Identifier of the edge this tag is attached to.
    pub edge_id: String,
    pub created_at: UnixMillis,
    pub last_seen: UnixMillis,
}

impl Entity {
    /// Refreshes `last_seen`, keeping it monotonically non-decreasing.
    pub fn touch(&mut self, now: UnixMillis) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

impl Edge {
    /// Refreshes `last_seen`, keeping it monotonically non-decreasing.
    pub fn touch(&mut self, now: UnixMillis) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Fqdn;

    #[test]
    fn touch_never_moves_backwards() {
        let mut entity = Entity {
            id: "e1".to_string(),
            asset: Asset::Fqdn(Fqdn::new("example.com").expect("valid fqdn")),
            created_at: 100,
            last_seen: 200,
        };
        entity.touch(150);
        assert_eq!(entity.last_seen, 200);
        entity.touch(300);
        assert_eq!(entity.last_seen, 300);
    }

    #[test]
    fn entity_json_roundtrip() {
        let entity = Entity {
            id: "e2".to_string(),
            asset: Asset::Fqdn(Fqdn::new("www.example.com").expect("valid fqdn")),
            created_at: 1,
            last_seen: 2,
        };
        let json = serde_json::to_string(&entity).expect("serialize");
        let decoded: Entity = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(entity, decoded);
    }
}
