//! The scene object forest: a tree of drawable nodes loaded once from
//! dumped map data and immutable afterwards.
//!
//! Node kinds form a closed set: group nodes that only carry children,
//! and three leaf kinds (styled lines, dashed stripes, simple textured
//! surfaces). Per-kind behavior is a match on the tag, so adding a kind is
//! a compile-time exhaustiveness error rather than a missed downcast.

use easy_tree::rayon::iter::ParallelIterator;
use glam::{Mat4, Vec4};

use crate::driver::{Driver, StippleParams};
use crate::mesh::Mesh;

/// Line rasterization style for [`SceneNode::Line`] leaves.
#[derive(Debug, Clone, Copy)]
pub struct LineStyle {
    pub width: f32,
    pub stipple: bool,
    pub stipple_factor: i32,
    pub stipple_pattern: u16,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self {
            width: 1.0,
            stipple: false,
            stipple_factor: 1,
            stipple_pattern: 0x00ff,
        }
    }
}

impl LineStyle {
    pub fn solid(width: f32) -> Self {
        Self {
            width,
            ..Default::default()
        }
    }

    pub fn stippled(width: f32, factor: i32, pattern: u16) -> Self {
        Self {
            width,
            stipple: true,
            stipple_factor: factor,
            stipple_pattern: pattern,
        }
    }

    /// Stipple parameters as applied to captured state, `None` when solid.
    pub fn stipple_params(&self) -> Option<StippleParams> {
        self.stipple.then_some(StippleParams {
            factor: self.stipple_factor,
            pattern: self.stipple_pattern,
        })
    }
}

/// Payload every drawable leaf carries.
#[derive(Debug, Clone)]
pub struct LeafData {
    pub shader: String,
    pub world: Mat4,
    pub mesh: Mesh,
}

impl LeafData {
    pub fn new(shader: impl Into<String>, world: Mat4, mesh: Mesh) -> Self {
        Self {
            shader: shader.into(),
            world,
            mesh,
        }
    }
}

/// One node of the scene forest.
#[derive(Debug, Clone)]
pub enum SceneNode {
    /// Structural node; recursed into, never drawn.
    Group,
    /// Styled line geometry with a solid color.
    Line {
        data: LeafData,
        style: LineStyle,
        color: Vec4,
    },
    /// Dashed lane-stripe geometry with a solid color.
    DashedStripe { data: LeafData, color: Vec4 },
    /// Textured surface with a uniform alpha.
    Textured { data: LeafData, alpha: f32 },
}

impl SceneNode {
    /// Leaf payload, `None` for groups.
    pub fn leaf(&self) -> Option<&LeafData> {
        match self {
            SceneNode::Group => None,
            SceneNode::Line { data, .. }
            | SceneNode::DashedStripe { data, .. }
            | SceneNode::Textured { data, .. } => Some(data),
        }
    }

    fn leaf_mut(&mut self) -> Option<&mut LeafData> {
        match self {
            SceneNode::Group => None,
            SceneNode::Line { data, .. }
            | SceneNode::DashedStripe { data, .. }
            | SceneNode::Textured { data, .. } => Some(data),
        }
    }

    /// Color/alpha payload packed the way the per-object uniform record
    /// expects it: solid colors verbatim, textured alpha splatted.
    pub fn uniform_color(&self) -> Option<Vec4> {
        match self {
            SceneNode::Group => None,
            SceneNode::Line { color, .. } | SceneNode::DashedStripe { color, .. } => Some(*color),
            SceneNode::Textured { alpha, .. } => Some(Vec4::splat(*alpha)),
        }
    }

    /// Line style for leaves that rasterize as styled lines.
    pub fn line_style(&self) -> Option<&LineStyle> {
        match self {
            SceneNode::Line { style, .. } => Some(style),
            _ => None,
        }
    }

    /// Whether this leaf kind participates in batched rendering. All
    /// current leaf kinds do; groups never draw themselves.
    pub fn contributes_draw(&self) -> bool {
        !matches!(self, SceneNode::Group)
    }
}

/// The object forest. A hidden group node roots the tree so a scene can
/// hold any number of top-level objects.
pub struct SceneTree {
    tree: easy_tree::Tree<SceneNode>,
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneTree {
    pub fn new() -> Self {
        Self {
            tree: easy_tree::Tree::new(),
        }
    }

    fn ensure_root(&mut self) {
        if self.tree.is_empty() {
            self.tree.add_node(SceneNode::Group);
        }
    }

    /// Adds a node under `parent`, or at the top level when `parent` is
    /// `None`. Returns the node id.
    pub fn add(&mut self, node: SceneNode, parent: Option<usize>) -> usize {
        self.ensure_root();
        match parent {
            Some(parent) => self.tree.add_child(parent, node),
            None => self.tree.add_child_to_root(node),
        }
    }

    pub fn get(&self, node_id: usize) -> Option<&SceneNode> {
        self.tree.get(node_id)
    }

    /// Number of nodes, the synthetic root excluded.
    pub fn len(&self) -> usize {
        self.tree.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-order traversal over every node. Groups are visited before
    /// their children; sibling order is insertion order, so the walk is
    /// deterministic for a given scene.
    pub fn for_each_pre_order<F: FnMut(usize, &SceneNode)>(&self, mut visit: F) {
        self.tree.traverse(
            |node_id, node, visit: &mut F| visit(node_id, node),
            |_node_id, _node, _visit| {},
            &mut visit,
        );
    }

    /// Interleaves every leaf mesh's vertex data in parallel, then
    /// uploads the staged bytes sequentially on the context thread.
    pub fn upload_meshes(&mut self, driver: &mut dyn Driver) {
        self.tree.par_iter_mut().for_each(|(_, node)| {
            if let Some(data) = node.leaf_mut() {
                data.mesh.stage();
            }
        });

        for (_, node) in self.tree.iter_mut() {
            if let Some(data) = node.leaf_mut() {
                data.mesh.upload(driver);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::PrimitiveTopology;
    use glam::Vec3;

    fn leaf(shader: &str) -> LeafData {
        LeafData::new(
            shader,
            Mat4::IDENTITY,
            Mesh::new(vec![Vec3::ZERO; 3], PrimitiveTopology::Triangles),
        )
    }

    #[test]
    fn pre_order_traversal_visits_groups_before_children() {
        let mut scene = SceneTree::new();
        let group = scene.add(SceneNode::Group, None);
        scene.add(
            SceneNode::DashedStripe {
                data: leaf("unlit_colored"),
                color: Vec4::ONE,
            },
            Some(group),
        );
        scene.add(
            SceneNode::Textured {
                data: leaf("simple_textured_object"),
                alpha: 0.5,
            },
            None,
        );

        let mut order = Vec::new();
        scene.for_each_pre_order(|id, node| order.push((id, node.contributes_draw())));

        // Synthetic root, group, stripe child, then the top-level leaf.
        assert_eq!(order.len(), 4);
        assert!(!order[0].1);
        assert_eq!(order[1], (group, false));
        assert!(order[2].1);
        assert!(order[3].1);
    }

    #[test]
    fn textured_leaves_splat_alpha_into_uniform_color() {
        let node = SceneNode::Textured {
            data: leaf("simple_textured_object"),
            alpha: 0.25,
        };
        assert_eq!(node.uniform_color(), Some(Vec4::splat(0.25)));
    }

    #[test]
    fn solid_line_has_no_stipple_params() {
        assert!(LineStyle::solid(2.0).stipple_params().is_none());

        let params = LineStyle::stippled(2.0, 1, 0x00ff).stipple_params().unwrap();
        assert_eq!(params.pattern, 0x00ff);
    }

    #[test]
    fn scene_len_excludes_synthetic_root() {
        let mut scene = SceneTree::new();
        assert!(scene.is_empty());
        scene.add(
            SceneNode::Line {
                data: leaf("unlit_colored"),
                style: LineStyle::solid(1.0),
                color: Vec4::ONE,
            },
            None,
        );
        assert_eq!(scene.len(), 1);
    }
}
