use super::manifold_point::ContactPoint;
use super::{CONTACT_BREAKING_THRESHOLD, ContactSurface};
use crate::collections::PoolItem;
use crate::handles::{BodyHandle, ShapeHandle};
use crate::linear_math::{inverse_transform_point, transform_point};
use arrayvec::ArrayVec;
use glam::{Mat3A, Vec3A};

pub const MANIFOLD_CACHE_SIZE: usize = 4;
const LIVE_MASK: u32 = (1 << MANIFOLD_CACHE_SIZE) - 1;

/// Unordered pair of shape identities. Construction sorts the handles, so
/// equal pairs hash equally regardless of query order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArbiterKey {
    pub first: ShapeHandle,
    pub second: ShapeHandle,
}

impl ArbiterKey {
    #[must_use]
    pub fn new(a: ShapeHandle, b: ShapeHandle) -> Self {
        if a.0 <= b.0 {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

/// Persistent collision record for one shape pair: the ≤4-point manifold and
/// its warm-start impulses. Slot liveness is a bitfield in the low four bits
/// of `usage_mask`; the upper bits stay zero.
pub struct ContactData {
    pub(crate) index: u32,
    pub key: ArbiterKey,
    pub shape1: ShapeHandle,
    pub shape2: ShapeHandle,
    pub body1: BodyHandle,
    pub body2: BodyHandle,
    pub friction: f32,
    pub restitution: f32,
    pub usage_mask: u32,
    pub points: [ContactPoint; MANIFOLD_CACHE_SIZE],
}

impl PoolItem for ContactData {
    fn index(&self) -> u32 {
        self.index
    }
    fn set_index(&mut self, index: u32) {
        self.index = index;
    }
}

impl ContactData {
    #[must_use]
    pub fn new(
        key: ArbiterKey,
        shape1: ShapeHandle,
        shape2: ShapeHandle,
        body1: BodyHandle,
        body2: BodyHandle,
        friction: f32,
        restitution: f32,
    ) -> Self {
        Self {
            index: 0,
            key,
            shape1,
            shape2,
            body1,
            body2,
            friction,
            restitution,
            usage_mask: 0,
            points: [ContactPoint::default(); MANIFOLD_CACHE_SIZE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_live(&self, slot: usize) -> bool {
        self.usage_mask & (1 << slot) != 0
    }

    #[must_use]
    pub fn live_count(&self) -> u32 {
        debug_assert_eq!(self.usage_mask & !LIVE_MASK, 0);
        self.usage_mask.count_ones()
    }

    pub fn live_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MANIFOLD_CACHE_SIZE).filter(|&s| self.is_live(s))
    }

    /// Recomputes world positions and separation from the current body
    /// transforms, keeping every slot. Used between substeps where dropping
    /// would lose contacts the solver is still working on.
    pub fn refresh_positions(&mut self, pos_a: Vec3A, orn_a: Mat3A, pos_b: Vec3A, orn_b: Mat3A) {
        for slot in 0..MANIFOLD_CACHE_SIZE {
            if !self.is_live(slot) {
                continue;
            }
            let point = &mut self.points[slot];
            point.world_a = transform_point(pos_a, orn_a, point.local_a);
            point.world_b = transform_point(pos_b, orn_b, point.local_b);
            point.distance = (point.world_a - point.world_b).dot(point.normal);
        }
    }

    /// Position refresh plus invalidation: contacts that separated or slid
    /// too far tangentially lose their slot (and their warm-start state).
    pub fn refresh(
        &mut self,
        pos_a: Vec3A,
        orn_a: Mat3A,
        pos_b: Vec3A,
        orn_b: Mat3A,
    ) {
        self.refresh_positions(pos_a, orn_a, pos_b, orn_b);

        for slot in 0..MANIFOLD_CACHE_SIZE {
            if !self.is_live(slot) {
                continue;
            }

            let point = &self.points[slot];
            if point.distance > CONTACT_BREAKING_THRESHOLD {
                self.usage_mask &= !(1 << slot);
                continue;
            }

            let projected = point.world_a - point.normal * point.distance;
            let drift = point.world_b - projected;
            if drift.length_squared() > CONTACT_BREAKING_THRESHOLD * CONTACT_BREAKING_THRESHOLD {
                self.usage_mask &= !(1 << slot);
            }
        }
    }

    /// Folds a narrowphase result into the manifold. A point landing on an
    /// existing anchor refreshes that slot and keeps its impulses; otherwise
    /// it takes a free slot or forces a reduction.
    pub fn add_contact(
        &mut self,
        surface: &ContactSurface,
        pos_a: Vec3A,
        orn_a: Mat3A,
        pos_b: Vec3A,
        orn_b: Mat3A,
    ) {
        let local_a = inverse_transform_point(pos_a, orn_a, surface.point_a);
        let local_b = inverse_transform_point(pos_b, orn_b, surface.point_b);

        let mut point = ContactPoint::new(local_a, local_b, surface.normal, surface.distance);
        point.world_a = surface.point_a;
        point.world_b = surface.point_b;

        const MATCH_TOLERANCE_SQ: f32 =
            CONTACT_BREAKING_THRESHOLD * CONTACT_BREAKING_THRESHOLD;

        for slot in 0..MANIFOLD_CACHE_SIZE {
            if !self.is_live(slot) {
                continue;
            }
            if (self.points[slot].local_a - local_a).length_squared() < MATCH_TOLERANCE_SQ {
                point.normal_impulse = self.points[slot].normal_impulse;
                point.tangent_impulse1 = self.points[slot].tangent_impulse1;
                point.tangent_impulse2 = self.points[slot].tangent_impulse2;
                self.points[slot] = point;
                return;
            }
        }

        for slot in 0..MANIFOLD_CACHE_SIZE {
            if !self.is_live(slot) {
                self.points[slot] = point;
                self.usage_mask |= 1 << slot;
                return;
            }
        }

        self.reduce(point);
    }

    /// Keeps the four of five contacts spanning the largest patch: the
    /// deepest point is always retained, then the farthest from it, then the
    /// largest triangle, then the candidate adding the most quadrilateral
    /// area.
    fn reduce(&mut self, extra: ContactPoint) {
        let mut candidates: ArrayVec<ContactPoint, 5> = ArrayVec::new();
        candidates.extend(self.points);
        candidates.push(extra);

        let deepest = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let k0 = candidates[deepest];

        let second = candidates
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != deepest)
            .max_by(|(_, a), (_, b)| {
                (a.world_b - k0.world_b)
                    .length_squared()
                    .total_cmp(&(b.world_b - k0.world_b).length_squared())
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let k1 = candidates[second];

        let third = candidates
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != deepest && i != second)
            .max_by(|(_, a), (_, b)| {
                triangle_area_sq(k0.world_b, k1.world_b, a.world_b)
                    .total_cmp(&triangle_area_sq(k0.world_b, k1.world_b, b.world_b))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let k2 = candidates[third];

        let fourth = candidates
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != deepest && i != second && i != third)
            .max_by(|(_, a), (_, b)| {
                quad_contribution(k0.world_b, k1.world_b, k2.world_b, a.world_b, k0.normal)
                    .total_cmp(&quad_contribution(
                        k0.world_b, k1.world_b, k2.world_b, b.world_b, k0.normal,
                    ))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let k3 = candidates[fourth];

        self.points = [k0, k1, k2, k3];
        self.usage_mask = LIVE_MASK;
    }
}

fn triangle_area_sq(a: Vec3A, b: Vec3A, c: Vec3A) -> f32 {
    (b - a).cross(c - a).length_squared()
}

/// Largest quadrilateral area reachable by inserting `d` between any pair of
/// the triangle's vertices, measured in the contact plane.
fn quad_contribution(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A, normal: Vec3A) -> f32 {
    let quad = |p0: Vec3A, p1: Vec3A, p2: Vec3A, p3: Vec3A| {
        0.5 * (p2 - p0).cross(p3 - p1).dot(normal).abs()
    };
    quad(a, b, c, d).max(quad(a, b, d, c)).max(quad(a, d, b, c))
}
