use std::any::Any;
use std::fmt::Debug;

use crate::coords::{Matrix, Rect};
use crate::paint::{BlendMode, Color};
use crate::texture::Texture;

/// Plugin name of the batch renderer.
pub const BATCH: &str = "batch";
pub const MESH: &str = "mesh";
pub const PARTICLE: &str = "particle";

/// Triangle list indices borrowed from a renderable.
///
/// Graphics can exceed the 16-bit range; the batch renderer re-bases every
/// element into its own 16-bit index buffer either way.
#[derive(Debug, Clone, Copy)]
pub enum Indices<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl Indices<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Indices::U16(i) => i.len(),
            Indices::U32(i) => i.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, n: usize) -> Option<usize> {
        match self {
            Indices::U16(i) => i.get(n).map(|&v| v as usize),
            Indices::U32(i) => i.get(n).map(|&v| v as usize),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter_map(|n| self.get(n))
    }
}

/// Triangles an object hands to the batch renderer for one frame.
#[derive(Debug, Clone, Copy)]
pub struct BatchElement<'a> {
    pub texture: &'a Texture,
    /// World-space positions as `x, y` pairs.
    pub vertices: &'a [f32],
    /// Normalized texture coordinates, one pair per vertex.
    pub uvs: &'a [f32],
    pub indices: Indices<'a>,
    /// Premultiplied color applied to every vertex.
    pub color: Color,
    /// Optional premultiplied per-vertex colors, multiplied with `color`.
    pub vertex_colors: Option<&'a [Color]>,
    pub blend: BlendMode,
}

impl BatchElement<'_> {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 2
    }

    /// Sum of the absolute triangle areas in world space.
    pub fn area(&self) -> f32 {
        let v = |n: usize| {
            self.indices
                .get(n)
                .and_then(|i| Some((*self.vertices.get(i * 2)?, *self.vertices.get(i * 2 + 1)?)))
                .unwrap_or((0.0, 0.0))
        };
        (0..self.indices.len() / 3)
            .map(|t| {
                let (a, b, c) = (v(t * 3), v(t * 3 + 1), v(t * 3 + 2));
                ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() * 0.5
            })
            .sum()
    }
}

/// Drawable content attached to a scene node.
///
/// The renderer only knows this capability: which plugin draws the object
/// and, for batchable objects, the triangles to append to the batch.
pub trait Renderable: Any + Debug {
    /// Registered name of the plugin that draws this object.
    fn plugin(&self) -> &'static str;

    /// Bounds in the node's local space.
    fn local_bounds(&self) -> Option<Rect> {
        None
    }

    /// Batch data for the given world transform. `world_id` changes whenever
    /// `world` does, so implementations may cache transformed vertices.
    fn batch(&mut self, _world: &Matrix, _world_id: u64, _world_alpha: f32) -> Option<BatchElement<'_>> {
        None
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Transforms local `x, y` pairs into `out`.
pub(crate) fn transform_points(world: &Matrix, local: &[f32], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(local.len());
    for p in local.chunks_exact(2) {
        out.push(world.a * p[0] + world.c * p[1] + world.tx);
        out.push(world.b * p[0] + world.d * p[1] + world.ty);
    }
}

macro_rules! impl_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

pub(crate) use impl_any;
