use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::types::{EntityHandle, Ray};

/// Bounds applied to a requested query range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub min_range: f64,
    pub max_range: f64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            min_range: 1.0,
            max_range: 2048.0,
        }
    }
}

impl QueryLimits {
    pub fn clamp(&self, range: f64) -> f64 {
        range.clamp(self.min_range, self.max_range)
    }
}

/// Input errors, rejected before a query ever reaches the worker pool.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("direction must be a finite, non-zero vector")]
    InvalidDirection,
    #[error("origin must be finite")]
    InvalidOrigin,
    #[error("range must be a number")]
    InvalidRange,
}

/// Who asked. The id routes the result; if it names an entity, that entity
/// is skipped by the raycast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester {
    id: String,
}

impl Requester {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The requester's own entity, when the id is an entity handle.
    pub fn entity(&self) -> Option<EntityHandle> {
        EntityHandle::parse(&self.id)
    }
}

/// A validated raycast request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    ray: Ray,
    max_range: f64,
    requester: Requester,
}

impl Query {
    /// Validate and build a query.
    ///
    /// The direction does not need to be normalized; only a zero or
    /// non-finite vector is rejected. The range is clamped to `limits`.
    pub fn new(
        origin: DVec3,
        direction: DVec3,
        max_range: f64,
        requester: Requester,
        limits: &QueryLimits,
    ) -> Result<Self, QueryError> {
        if !origin.is_finite() {
            return Err(QueryError::InvalidOrigin);
        }
        if max_range.is_nan() {
            return Err(QueryError::InvalidRange);
        }
        let ray = Ray::new(origin, direction).ok_or(QueryError::InvalidDirection)?;
        Ok(Self {
            ray,
            max_range: limits.clamp(max_range),
            requester,
        })
    }

    pub fn ray(&self) -> &Ray {
        &self.ray
    }

    pub fn origin(&self) -> DVec3 {
        self.ray.origin
    }

    /// Unit-length direction.
    pub fn direction(&self) -> DVec3 {
        self.ray.direction
    }

    pub fn max_range(&self) -> f64 {
        self.max_range
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(direction: DVec3, range: f64) -> Result<Query, QueryError> {
        Query::new(
            DVec3::new(0.0, 64.0, 0.0),
            direction,
            range,
            Requester::new("computer_1"),
            &QueryLimits::default(),
        )
    }

    #[test]
    fn zero_direction_is_rejected() {
        assert_eq!(build(DVec3::ZERO, 10.0), Err(QueryError::InvalidDirection));
    }

    #[test]
    fn large_components_are_normalized_not_rejected() {
        let q = build(DVec3::new(2.0, 3.0, 6.0), 10.0).unwrap();
        assert!((q.direction().length() - 1.0).abs() < 1e-12);
        assert!((q.direction() - DVec3::new(2.0, 3.0, 6.0) / 7.0).length() < 1e-12);
    }

    #[test]
    fn range_is_clamped() {
        assert_eq!(build(DVec3::X, 0.0).unwrap().max_range(), 1.0);
        assert_eq!(build(DVec3::X, 1e9).unwrap().max_range(), 2048.0);
        assert_eq!(build(DVec3::X, f64::INFINITY).unwrap().max_range(), 2048.0);
        assert_eq!(build(DVec3::X, 50.0).unwrap().max_range(), 50.0);
    }

    #[test]
    fn nan_range_and_origin_are_rejected() {
        assert_eq!(build(DVec3::X, f64::NAN), Err(QueryError::InvalidRange));
        let err = Query::new(
            DVec3::new(f64::INFINITY, 0.0, 0.0),
            DVec3::X,
            5.0,
            Requester::new("x"),
            &QueryLimits::default(),
        );
        assert_eq!(err, Err(QueryError::InvalidOrigin));
    }

    #[test]
    fn requester_entity_only_for_uuid_ids() {
        let h = EntityHandle::new();
        assert_eq!(Requester::new(h.to_string()).entity(), Some(h));
        assert_eq!(Requester::new("computer_1").entity(), None);
    }
}
