use std::collections::BTreeMap;

use serde::Serialize;

use super::entity::DeviceInfo;
use super::entity::EntityState;
use super::entity::Platform;

/// What the engine knows about one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub unique_id: String,
    pub name: String,
    pub platform: Platform,
    pub integration: String,
    pub device: DeviceInfo,

    /// Last reported state; `None` until the first state message arrives.
    pub state: Option<EntityState>,
}

/// Centralized snapshot of the entire engine state, keyed by entity id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: BTreeMap<String, EntityRecord>,
}
