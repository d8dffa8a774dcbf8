use crate::coords::{Matrix, Vec2};

/// Decomposed local transform plus the cached world matrix.
///
/// Setters bump `local_id`; `update` recomputes the local matrix only when
/// that id moved and the world matrix only when the local matrix or the
/// parent's `world_id` changed. Every recomputation bumps `world_id`, which
/// children and vertex caches key on.
#[derive(Debug, Clone)]
pub struct Transform {
    position: Vec2,
    scale: Vec2,
    pivot: Vec2,
    skew: Vec2,
    rotation: f32,

    local: Matrix,
    world: Matrix,

    local_id: u64,
    current_local_id: u64,
    world_id: u64,
    parent_id: u64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            scale: Vec2::ONE,
            pivot: Vec2::ZERO,
            skew: Vec2::ZERO,
            rotation: 0.0,
            local: Matrix::IDENTITY,
            world: Matrix::IDENTITY,
            local_id: 0,
            current_local_id: 0,
            world_id: 0,
            parent_id: u64::MAX,
        }
    }
}

macro_rules! setter {
    ($set:ident, $get:ident, $field:ident, $ty:ty) => {
        #[inline]
        pub fn $get(&self) -> $ty {
            self.$field
        }

        pub fn $set(&mut self, value: $ty) {
            if self.$field != value {
                self.$field = value;
                self.local_id += 1;
            }
        }
    };
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    setter!(set_position, position, position, Vec2);
    setter!(set_scale, scale, scale, Vec2);
    setter!(set_pivot, pivot, pivot, Vec2);
    setter!(set_skew, skew, skew, Vec2);
    setter!(set_rotation, rotation, rotation, f32);

    #[inline]
    pub fn local(&self) -> &Matrix {
        &self.local
    }

    #[inline]
    pub fn world(&self) -> &Matrix {
        &self.world
    }

    #[inline]
    pub fn world_id(&self) -> u64 {
        self.world_id
    }

    /// Forces the next `update` to recompute the world matrix.
    pub(crate) fn invalidate_parent(&mut self) {
        self.parent_id = u64::MAX;
    }

    pub fn update(&mut self, parent_world: &Matrix, parent_world_id: u64) {
        if self.local_id != self.current_local_id {
            self.local
                .set_transform(self.position, self.pivot, self.scale, self.rotation, self.skew);
            self.current_local_id = self.local_id;
            self.parent_id = u64::MAX;
        }

        if self.parent_id != parent_world_id {
            self.world = parent_world.then(&self.local);
            self.parent_id = parent_world_id;
            self.world_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_transform_keeps_world_id() {
        let mut t = Transform::new();
        t.set_position(Vec2::new(3.0, 4.0));
        t.update(&Matrix::IDENTITY, 1);
        let id = t.world_id();
        t.update(&Matrix::IDENTITY, 1);
        assert_eq!(t.world_id(), id);

        t.set_position(Vec2::new(3.0, 4.0));
        t.update(&Matrix::IDENTITY, 1);
        assert_eq!(t.world_id(), id);
    }

    #[test]
    fn parent_change_recomputes_world() {
        let mut t = Transform::new();
        t.set_position(Vec2::new(1.0, 0.0));
        t.update(&Matrix::IDENTITY, 1);
        t.update(&Matrix::translation(10.0, 0.0), 2);
        assert_eq!(t.world().apply(Vec2::ZERO), Vec2::new(11.0, 0.0));
    }
}
