use crate::dynamics::constraint_solver::SolverRow;
use crate::dynamics::rigid_body::RigidBody;
use crate::handles::{BodyHandle, ConstraintHandle};

/// Maximal set of bodies coupled through contacts and constraints: the unit
/// of sleeping and of parallel solving. Scratch buffers keep their capacity
/// across steps so the hot path never reallocates.
pub struct Island {
    pub(crate) in_use: bool,
    pub bodies: Vec<BodyHandle>,
    pub marked_as_active: bool,
    pub needs_update: bool,
    pub(crate) arbiters: Vec<u32>,
    pub(crate) constraints: Vec<ConstraintHandle>,
    pub(crate) rows: Vec<SolverRow>,
    /// Arbiters found dead during the parallel narrowphase, drained in the
    /// sequential phase.
    pub(crate) broken: Vec<u32>,
}

impl Island {
    fn new(body: BodyHandle) -> Self {
        Self {
            in_use: true,
            bodies: vec![body],
            marked_as_active: true,
            needs_update: false,
            arbiters: Vec::new(),
            constraints: Vec::new(),
            rows: Vec::new(),
            broken: Vec::new(),
        }
    }

    fn recycle(&mut self, body: BodyHandle) {
        self.in_use = true;
        self.bodies.clear();
        self.bodies.push(body);
        self.marked_as_active = true;
        self.needs_update = false;
        self.arbiters.clear();
        self.constraints.clear();
        self.rows.clear();
        self.broken.clear();
    }
}

/// Island storage with id recycling. Merges are O(smaller side); splits are
/// run by the world in the sequential phase via a connection traversal.
pub struct Islands {
    islands: Vec<Island>,
    free: Vec<u32>,
}

impl Islands {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            islands: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    pub fn create(&mut self, body: BodyHandle) -> u32 {
        if let Some(id) = self.free.pop() {
            self.islands[id as usize].recycle(body);
            id
        } else {
            self.islands.push(Island::new(body));
            self.islands.len() as u32 - 1
        }
    }

    /// Allocates an empty island shell, used while splitting.
    pub(crate) fn create_empty(&mut self) -> u32 {
        let id = self.create(BodyHandle(0));
        self.islands[id as usize].bodies.clear();
        id
    }

    pub fn destroy(&mut self, id: u32) {
        let island = &mut self.islands[id as usize];
        debug_assert!(island.bodies.len() <= 1);
        island.in_use = false;
        island.bodies.clear();
        island.arbiters.clear();
        island.constraints.clear();
        self.free.push(id);
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> &Island {
        &self.islands[id as usize]
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, id: u32) -> &mut Island {
        &mut self.islands[id as usize]
    }

    #[must_use]
    pub fn slice_mut(&mut self) -> &mut [Island] {
        &mut self.islands
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (u32, &Island)> {
        self.islands
            .iter()
            .enumerate()
            .filter(|(_, i)| i.in_use && i.marked_as_active)
            .map(|(id, i)| (id as u32, i))
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.iter_active().count()
    }

    /// Merges the islands of two connected bodies, moving the smaller member
    /// list into the larger. Returns the surviving island id.
    pub fn merge(
        &mut self,
        island_a: u32,
        island_b: u32,
        bodies: &mut [Option<RigidBody>],
    ) -> u32 {
        debug_assert_ne!(island_a, island_b);

        let (winner, loser) = if self.islands[island_a as usize].bodies.len()
            >= self.islands[island_b as usize].bodies.len()
        {
            (island_a, island_b)
        } else {
            (island_b, island_a)
        };

        debug_assert!(
            self.islands[winner as usize].in_use && self.islands[loser as usize].in_use
        );

        let mut moved_bodies = std::mem::take(&mut self.islands[loser as usize].bodies);
        let mut moved_arbiters = std::mem::take(&mut self.islands[loser as usize].arbiters);
        let mut moved_constraints = std::mem::take(&mut self.islands[loser as usize].constraints);

        for &body in &moved_bodies {
            if let Some(body) = bodies[body.0 as usize].as_mut() {
                body.island = winner;
            }
        }

        let active = self.islands[winner as usize].marked_as_active
            || self.islands[loser as usize].marked_as_active;

        let target = &mut self.islands[winner as usize];
        target.bodies.append(&mut moved_bodies);
        target.arbiters.append(&mut moved_arbiters);
        target.constraints.append(&mut moved_constraints);
        target.marked_as_active = active;

        self.islands[loser as usize].in_use = false;
        self.free.push(loser);
        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_slab(count: u32) -> Vec<Option<RigidBody>> {
        (0..count)
            .map(|i| Some(RigidBody::new(BodyHandle(i), 0)))
            .collect()
    }

    #[test]
    fn merge_moves_smaller_into_larger() {
        let mut islands = Islands::new(8);
        let mut bodies = body_slab(3);

        let a = islands.create(BodyHandle(0));
        let b = islands.create(BodyHandle(1));
        let c = islands.create(BodyHandle(2));
        for (i, body) in bodies.iter_mut().enumerate() {
            body.as_mut().unwrap().island = [a, b, c][i];
        }

        let ab = islands.merge(a, b, &mut bodies);
        assert_eq!(islands.get(ab).bodies.len(), 2);

        let abc = islands.merge(ab, c, &mut bodies);
        assert_eq!(abc, ab, "larger island must win");
        assert_eq!(islands.get(abc).bodies.len(), 3);
        for body in bodies.iter().flatten() {
            assert_eq!(body.island, abc);
        }
        assert_eq!(islands.iter_active().count(), 1);
    }

    #[test]
    fn merged_activity_is_sticky() {
        let mut islands = Islands::new(4);
        let mut bodies = body_slab(2);
        let a = islands.create(BodyHandle(0));
        let b = islands.create(BodyHandle(1));
        bodies[0].as_mut().unwrap().island = a;
        bodies[1].as_mut().unwrap().island = b;

        islands.get_mut(b).marked_as_active = false;
        let winner = islands.merge(a, b, &mut bodies);
        assert!(islands.get(winner).marked_as_active);
    }

    #[test]
    fn destroyed_ids_are_recycled() {
        let mut islands = Islands::new(4);
        let a = islands.create(BodyHandle(0));
        islands.destroy(a);
        let b = islands.create(BodyHandle(1));
        assert_eq!(a, b);
        assert!(islands.get(b).in_use);
        assert_eq!(islands.get(b).bodies, vec![BodyHandle(1)]);
    }
}
