use indextree::{Arena, NodeId};
use thiserror::Error;

use crate::coords::Matrix;

use super::{MaskSource, Node, Renderable, SortKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("node {0:?} does not exist or was removed")]
    UnknownNode(NodeId),

    #[error("node {child:?} cannot be added below its own descendant {parent:?}")]
    Cycle { parent: NodeId, child: NodeId },
}

/// Arena-backed display tree.
///
/// Nodes are addressed by [`NodeId`]. A node has at most one parent; adding
/// it elsewhere detaches it first. Removing or destroying a subtree drops
/// its content, which releases any texture views it held.
#[derive(Debug)]
pub struct Scene {
    arena: Arena<Node>,
    root: NodeId,
    parent_world: Matrix,
    parent_world_id: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(Node::container());
        Self { arena, root, parent_world: Matrix::IDENTITY, parent_world_id: 1 }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Creates a detached node.
    pub fn create(&mut self, node: Node) -> NodeId {
        self.arena.new_node(node)
    }

    /// Creates a node as the last child of the root.
    pub fn add(&mut self, node: Node) -> NodeId {
        let root = self.root;
        self.add_to(root, node)
    }

    /// Creates a node as the last child of `parent`.
    pub fn add_to(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.arena.new_node(node);
        if self.contains(parent) {
            parent.append(id, &mut self.arena);
        } else {
            log::warn!("scene: parent {parent:?} does not exist; node {id:?} left detached");
        }
        id
    }

    /// Moves `child` to the end of `parent`'s children.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        for id in [parent, child] {
            if !self.contains(id) {
                return Err(SceneError::UnknownNode(id));
            }
        }
        if parent.ancestors(&self.arena).any(|a| a == child) {
            return Err(SceneError::Cycle { parent, child });
        }
        child.detach(&mut self.arena);
        parent.append(child, &mut self.arena);
        if let Some(node) = self.node_mut(child) {
            node.transform.invalidate_parent();
        }
        Ok(())
    }

    /// Detaches `child` from its parent, keeping the subtree alive.
    pub fn remove_child(&mut self, child: NodeId) {
        if self.contains(child) && child != self.root {
            child.detach(&mut self.arena);
        }
    }

    /// Removes a subtree and drops its content. Destroying the root clears
    /// its children instead.
    pub fn destroy(&mut self, id: NodeId) {
        if !self.contains(id) {
            return;
        }
        if id == self.root {
            let children: Vec<NodeId> = id.children(&self.arena).collect();
            for c in children {
                c.remove_subtree(&mut self.arena);
            }
        } else {
            id.remove_subtree(&mut self.arena);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some_and(|n| !n.is_removed()) && !id.is_removed(&self.arena)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if !self.contains(id) {
            return None;
        }
        self.arena.get(id).map(|n| n.get())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        if !self.contains(id) {
            return None;
        }
        self.arena.get_mut(id).map(|n| n.get_mut())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        self.arena.get(id).and_then(|n| n.parent())
    }

    /// Children in list order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        id.children(&self.arena).collect()
    }

    /// Children in paint order.
    pub fn paint_order(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.node(id) else { return Vec::new() };
        if !node.sortable_children {
            return self.children(id);
        }
        let mut keyed: Vec<(SortKey, NodeId)> = id
            .children(&self.arena)
            .enumerate()
            .map(|(i, c)| {
                let z = self.node(c).map_or(0, |n| n.z_index);
                (SortKey::new(z, i as u32), c)
            })
            .collect();
        keyed.sort_by_key(|(k, _)| *k);
        keyed.into_iter().map(|(_, c)| c).collect()
    }

    /// Sets or clears the mask of `id`. A node used as mask source stops
    /// being painted on its own.
    pub fn set_mask(&mut self, id: NodeId, mask: Option<MaskSource>) {
        if let Some(MaskSource::Node(m)) = mask {
            if let Some(mask_node) = self.node_mut(m) {
                mask_node.renderable = false;
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.mask = mask;
        }
    }

    pub fn get<T: Renderable>(&self, id: NodeId) -> Option<&T> {
        self.node(id)?.content()?.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: Renderable>(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id)?.content_mut()?.as_any_mut().downcast_mut::<T>()
    }

    /// Recomputes world transforms and alphas top-down. `parent` is applied
    /// above the root (e.g. a render transform).
    pub fn update_transforms(&mut self, parent: Option<&Matrix>) {
        let parent = parent.copied().unwrap_or(Matrix::IDENTITY);
        if parent != self.parent_world {
            self.parent_world = parent;
            self.parent_world_id += 1;
        }

        let mut stack = vec![(self.root, self.parent_world, self.parent_world_id, 1.0_f32)];
        while let Some((id, world, world_id, alpha)) = stack.pop() {
            let Some(node) = self.node_mut(id) else { continue };
            node.transform.update(&world, world_id);
            let world_alpha = alpha * node.alpha;
            node.set_world_alpha(world_alpha);
            let (w, wid) = (*node.transform.world(), node.transform.world_id());

            let first = stack.len();
            stack.extend(id.children(&self.arena).map(|c| (c, w, wid, world_alpha)));
            stack[first..].reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Vec2;
    use core::f32::consts::FRAC_PI_2;

    fn world_origin(scene: &Scene, id: NodeId) -> Vec2 {
        scene.node(id).unwrap().world_transform().apply(Vec2::ZERO)
    }

    // ── transforms ────────────────────────────────────────────────────────

    #[test]
    fn child_position_composes_with_scaled_parent() {
        let mut scene = Scene::new();
        let parent = scene.add(Node::container().at(100.0, 50.0).with_scale(2.0, 2.0));
        let child = scene.add_to(parent, Node::container().at(5.0, 7.0));
        scene.update_transforms(None);
        assert_eq!(world_origin(&scene, child), Vec2::new(110.0, 64.0));
    }

    #[test]
    fn three_levels_with_rotation() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container().at(10.0, 10.0).with_scale(2.0, 2.0));
        let b = scene.add_to(a, Node::container().at(5.0, 0.0).with_rotation(FRAC_PI_2));
        let c = scene.add_to(b, Node::container().at(3.0, 0.0));
        scene.update_transforms(None);

        // b sits at 10 + 2*5 = 20; its x axis points down and is scaled by 2.
        assert!(world_origin(&scene, b).approx_eq(Vec2::new(20.0, 10.0), 1e-4));
        assert!(world_origin(&scene, c).approx_eq(Vec2::new(20.0, 16.0), 1e-4));
    }

    #[test]
    fn moving_a_parent_updates_descendants() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container());
        let b = scene.add_to(a, Node::container().at(1.0, 1.0));
        scene.update_transforms(None);
        let id = scene.node(b).unwrap().transform.world_id();

        scene.node_mut(a).unwrap().transform.set_position(Vec2::new(10.0, 0.0));
        scene.update_transforms(None);
        assert_eq!(world_origin(&scene, b), Vec2::new(11.0, 1.0));
        assert!(scene.node(b).unwrap().transform.world_id() > id);
    }

    #[test]
    fn render_transform_is_applied_above_the_root() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container().at(1.0, 2.0));
        scene.update_transforms(Some(&Matrix::translation(-1.0, -2.0)));
        assert_eq!(world_origin(&scene, a), Vec2::ZERO);
    }

    #[test]
    fn world_alpha_multiplies() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container().with_alpha(0.5));
        let b = scene.add_to(a, Node::container().with_alpha(0.5));
        scene.update_transforms(None);
        assert_eq!(scene.node(b).unwrap().world_alpha(), 0.25);
    }

    // ── hierarchy ─────────────────────────────────────────────────────────

    #[test]
    fn re_adding_detaches_from_old_parent() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container().at(100.0, 0.0));
        let b = scene.add(Node::container());
        let child = scene.add_to(a, Node::container());
        scene.update_transforms(None);

        scene.add_child(b, child).unwrap();
        assert!(scene.children(a).is_empty());
        assert_eq!(scene.children(b), vec![child]);
        assert_eq!(scene.parent(child), Some(b));

        scene.update_transforms(None);
        assert_eq!(world_origin(&scene, child), Vec2::ZERO);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container());
        let b = scene.add_to(a, Node::container());
        assert_eq!(scene.add_child(b, a), Err(SceneError::Cycle { parent: b, child: a }));
    }

    #[test]
    fn z_sort_is_stable() {
        let mut scene = Scene::new();
        let root = scene.root();
        scene.node_mut(root).unwrap().sortable_children = true;
        let a = scene.add(Node::container().with_z_index(1));
        let b = scene.add(Node::container());
        let c = scene.add(Node::container().with_z_index(1));
        let d = scene.add(Node::container());
        assert_eq!(scene.paint_order(root), vec![b, d, a, c]);
    }

    #[test]
    fn destroy_removes_subtree() {
        let mut scene = Scene::new();
        let a = scene.add(Node::container());
        let b = scene.add_to(a, Node::container());
        scene.destroy(a);
        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(scene.children(scene.root()).is_empty());
        assert_eq!(scene.add_child(scene.root(), b), Err(SceneError::UnknownNode(b)));
    }
}
