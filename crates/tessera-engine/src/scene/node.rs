use indextree::NodeId;

use crate::coords::{Matrix, Rect, Vec2};

use super::{Renderable, Transform};

/// What limits the visible area of a node and its subtree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaskSource {
    /// Rectangle in the masked node's local space.
    Rect(Rect),
    /// Another node whose batchable content (usually a `Graphics`) defines
    /// the visible area. The mask node itself is not painted.
    Node(NodeId),
}

/// Scene graph node: transform, visibility and optional drawable content.
///
/// A node without content is a plain container.
#[derive(Debug)]
pub struct Node {
    pub transform: Transform,
    pub alpha: f32,
    pub visible: bool,
    /// Content is drawn only when set; children are unaffected.
    pub renderable: bool,
    pub z_index: i32,
    /// Children are painted by ascending `z_index` (stable) when set,
    /// otherwise in list order.
    pub sortable_children: bool,
    pub(crate) mask: Option<MaskSource>,
    content: Option<Box<dyn Renderable>>,
    world_alpha: f32,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            alpha: 1.0,
            visible: true,
            renderable: true,
            z_index: 0,
            sortable_children: false,
            mask: None,
            content: None,
            world_alpha: 1.0,
        }
    }
}

impl Node {
    pub fn container() -> Self {
        Self::default()
    }

    pub fn with_content(content: impl Renderable) -> Self {
        Self { content: Some(Box::new(content)), ..Self::default() }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.transform.set_position(Vec2::new(x, y));
        self
    }

    pub fn with_scale(mut self, sx: f32, sy: f32) -> Self {
        self.transform.set_scale(Vec2::new(sx, sy));
        self
    }

    pub fn with_rotation(mut self, radians: f32) -> Self {
        self.transform.set_rotation(radians);
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_z_index(mut self, z: i32) -> Self {
        self.z_index = z;
        self
    }

    pub fn sorted(mut self) -> Self {
        self.sortable_children = true;
        self
    }

    pub fn content(&self) -> Option<&dyn Renderable> {
        self.content.as_deref()
    }

    pub fn content_mut(&mut self) -> Option<&mut dyn Renderable> {
        match &mut self.content {
            Some(c) => Some(c.as_mut()),
            None => None,
        }
    }

    pub fn set_content(&mut self, content: Option<Box<dyn Renderable>>) {
        self.content = content;
    }

    #[inline]
    pub fn mask(&self) -> Option<MaskSource> {
        self.mask
    }

    /// Alpha multiplied down from the root, valid after a transform update.
    #[inline]
    pub fn world_alpha(&self) -> f32 {
        self.world_alpha
    }

    #[inline]
    pub fn world_transform(&self) -> &Matrix {
        self.transform.world()
    }

    pub(crate) fn set_world_alpha(&mut self, alpha: f32) {
        self.world_alpha = alpha;
    }
}
