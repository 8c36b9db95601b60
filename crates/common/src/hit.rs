use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::Aabb;

/// Token returned by a submit, echoed on the matching result event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a raycast hit. Field names shared between variants (`x`, `y`, `z`,
/// `health`, `max_health`, `armor`, `namespace`, `distance`) mean the same
/// thing in each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result_kind")]
pub enum HitResult {
    Miss,
    Block {
        distance: f64,
        x: i32,
        y: i32,
        z: i32,
        namespace: String,
    },
    ShipBlock {
        distance: f64,
        ship_id: u64,
        ship_bounds: Aabb,
        x: i32,
        y: i32,
        z: i32,
        namespace: String,
    },
    Entity {
        distance: f64,
        category: String,
        name: String,
        x: f64,
        y: f64,
        z: f64,
        health: f32,
        max_health: f32,
        armor: f32,
    },
    Player {
        distance: f64,
        name: String,
        x: f64,
        y: f64,
        z: f64,
        health: f32,
        max_health: f32,
        armor: f32,
    },
}

impl HitResult {
    /// Distance along the ray, `None` for a miss.
    pub fn distance(&self) -> Option<f64> {
        match self {
            Self::Miss => None,
            Self::Block { distance, .. }
            | Self::ShipBlock { distance, .. }
            | Self::Entity { distance, .. }
            | Self::Player { distance, .. } => Some(*distance),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Miss => "Miss",
            Self::Block { .. } => "Block",
            Self::ShipBlock { .. } => "ShipBlock",
            Self::Entity { .. } => "Entity",
            Self::Player { .. } => "Player",
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// The payload pushed back to the guest script for one accepted query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub hit: HitResult,
}
