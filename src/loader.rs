//! Loads dumped road-graph scene descriptors into a scene forest.
//!
//! Each file in a dump directory holds one JSON object descriptor: a type
//! name, draw info (shader, world matrix, draw mode, kind-specific color /
//! alpha / line style) and mesh channels, with composite road elements
//! nesting their parts under `sub_mesh`. Files are parsed by a pool of
//! worker threads claiming work through an atomic counter; results are
//! merged by file index so the resulting forest, and therefore traversal
//! order, is stable across runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use glam::{Mat4, Vec2, Vec3};
use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::mesh::{Mesh, PrimitiveTopology};
use crate::scene::{LeafData, LineStyle, SceneNode, SceneTree};

/// Descriptor type names instantiated as group nodes over their
/// `sub_mesh` children.
const COMPOSITE_KINDS: [&str; 12] = [
    "LaneRenderObject",
    "JunctionRenderObject",
    "LaneCenterCurveRenderObject",
    "PolygonObjectRenderObject",
    "SidewalkRenderObject",
    "SpeedBumpRenderObject",
    "SignalLaneRenderObject",
    "SignalStopLineRenderObject",
    "CrosswalkRenderObject",
    "GroupObject",
    "ClearAreaRenderObject",
    "StopLineRenderObject",
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to list scene directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One dumped object descriptor as it appears on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub draw_info: Option<DrawInfoDescriptor>,
    #[serde(default)]
    pub mesh: Option<MeshDescriptor>,
    #[serde(default)]
    pub sub_mesh: Vec<ObjectDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawInfoDescriptor {
    pub shader: String,
    /// Column-major 4x4 world matrix, one inner array per column.
    pub world_matrix: [[f32; 4]; 4],
    pub draw_mode: u32,
    #[serde(default)]
    pub color: Option<[f32; 4]>,
    #[serde(default)]
    pub alpha: Option<f32>,
    #[serde(default)]
    pub line_style: Option<LineStyleDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineStyleDescriptor {
    pub line_width: f32,
    #[serde(default)]
    pub line_stipple: bool,
    #[serde(default = "default_stipple_factor")]
    pub line_stipple_factor: i32,
    #[serde(default = "default_stipple_pattern")]
    pub line_stipple_pattern: u16,
}

fn default_stipple_factor() -> i32 {
    1
}

fn default_stipple_pattern() -> u16 {
    0x00ff
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshDescriptor {
    pub position: Vec<[f32; 3]>,
    #[serde(default)]
    pub color: Option<Vec<[u8; 4]>>,
    #[serde(default)]
    pub uv: Option<Vec<[f32; 2]>>,
    #[serde(default)]
    pub index: Option<Vec<u32>>,
}

impl LineStyleDescriptor {
    fn to_style(&self) -> LineStyle {
        LineStyle {
            width: self.line_width,
            stipple: self.line_stipple,
            stipple_factor: self.line_stipple_factor,
            stipple_pattern: self.line_stipple_pattern,
        }
    }
}

/// Loads every descriptor file under `dir` into a new scene forest.
///
/// Unparsable files and unregistered descriptor types are logged and
/// skipped; only a failure to list the directory itself is an error.
pub fn load_directory(dir: &Path) -> Result<SceneTree, LoadError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| LoadError::Directory {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let descriptors = parse_files_parallel(&files);

    let mut scene = SceneTree::new();
    for descriptor in descriptors {
        add_to_scene(descriptor, &mut scene, None);
    }
    Ok(scene)
}

/// Parses descriptor files on a worker pool. Workers claim files through
/// a shared atomic read counter; output keeps file order.
fn parse_files_parallel(files: &[PathBuf]) -> Vec<ObjectDescriptor> {
    let worker_count = thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1)
        .min(files.len().max(1));

    let next_file = AtomicUsize::new(0);
    let mut indexed: Vec<(usize, ObjectDescriptor)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..worker_count)
            .map(|_| {
                scope.spawn(|| {
                    let mut parsed = Vec::new();
                    loop {
                        let index = next_file.fetch_add(1, Ordering::Relaxed);
                        if index >= files.len() {
                            break;
                        }
                        if let Some(descriptor) = parse_file(&files[index]) {
                            parsed.push((index, descriptor));
                        }
                    }
                    parsed
                })
            })
            .collect();

        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap_or_default())
            .collect()
    });

    indexed.sort_by_key(|(index, _)| *index);
    indexed
        .into_iter()
        .map(|(_, descriptor)| descriptor)
        .collect()
}

fn parse_file(path: &Path) -> Option<ObjectDescriptor> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            warn!("failed to read {}: {error}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(descriptor) => Some(descriptor),
        Err(error) => {
            warn!("failed to parse {}: {error}", path.display());
            None
        }
    }
}

/// Instantiates a descriptor (and its sub-meshes, recursively) under
/// `parent`. Unregistered type names are logged and skipped.
pub fn add_to_scene(descriptor: ObjectDescriptor, scene: &mut SceneTree, parent: Option<usize>) {
    if COMPOSITE_KINDS.contains(&descriptor.kind.as_str()) {
        let group = scene.add(SceneNode::Group, parent);
        for sub in descriptor.sub_mesh {
            add_to_scene(sub, scene, Some(group));
        }
        return;
    }

    let node = match descriptor.kind.as_str() {
        "LineObject" => leaf_parts(&descriptor).map(|(data, draw_info)| SceneNode::Line {
            data,
            style: draw_info
                .line_style
                .as_ref()
                .map(LineStyleDescriptor::to_style)
                .unwrap_or_default(),
            color: draw_info.color.unwrap_or([1.0; 4]).into(),
        }),
        "DashedStripeObject" => {
            leaf_parts(&descriptor).map(|(data, draw_info)| SceneNode::DashedStripe {
                data,
                color: draw_info.color.unwrap_or([1.0; 4]).into(),
            })
        }
        "SimpleTexturedObject" => {
            leaf_parts(&descriptor).map(|(data, draw_info)| SceneNode::Textured {
                data,
                alpha: draw_info.alpha.unwrap_or(1.0),
            })
        }
        other => {
            warn!("unregistered descriptor type: {other}");
            None
        }
    };

    if let Some(node) = node {
        scene.add(node, parent);
    }
}

/// Builds the common leaf payload from a descriptor, or reports what is
/// missing and yields nothing.
fn leaf_parts<'a>(
    descriptor: &'a ObjectDescriptor,
) -> Option<(LeafData, &'a DrawInfoDescriptor)> {
    let draw_info = match &descriptor.draw_info {
        Some(draw_info) => draw_info,
        None => {
            warn!("{} descriptor without draw_info, skipping", descriptor.kind);
            return None;
        }
    };
    let mesh_descriptor = match &descriptor.mesh {
        Some(mesh) => mesh,
        None => {
            warn!("{} descriptor without mesh, skipping", descriptor.kind);
            return None;
        }
    };
    let topology = match PrimitiveTopology::from_raw(draw_info.draw_mode) {
        Some(topology) => topology,
        None => {
            warn!(
                "{} descriptor with unknown draw_mode {}, skipping",
                descriptor.kind, draw_info.draw_mode
            );
            return None;
        }
    };

    let positions: Vec<Vec3> = mesh_descriptor
        .position
        .iter()
        .map(|&position| Vec3::from(position))
        .collect();
    let mut mesh = Mesh::new(positions, topology);
    if let Some(colors) = &mesh_descriptor.color {
        mesh = mesh.with_colors(colors.clone());
    }
    if let Some(uvs) = &mesh_descriptor.uv {
        mesh = mesh.with_uvs(uvs.iter().map(|&uv| Vec2::from(uv)).collect());
    }
    if let Some(indices) = &mesh_descriptor.index {
        mesh = mesh.with_indices(indices.clone());
    }

    let world = Mat4::from_cols_array_2d(&draw_info.world_matrix);
    Some((LeafData::new(&draw_info.shader, world, mesh), draw_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::AttribMask;

    const LINE_DESCRIPTOR: &str = r#"{
        "type": "LineObject",
        "draw_info": {
            "shader": "unlit_colored",
            "world_matrix": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[4,5,6,1]],
            "draw_mode": 3,
            "color": [0.2, 0.4, 0.6, 1.0],
            "line_style": {
                "line_width": 2.0,
                "line_stipple": true,
                "line_stipple_factor": 1,
                "line_stipple_pattern": 255
            }
        },
        "mesh": {
            "position": [[0,0,0],[1,0,0],[1,1,0]]
        }
    }"#;

    #[test]
    fn line_descriptor_becomes_a_line_leaf() {
        let descriptor: ObjectDescriptor = serde_json::from_str(LINE_DESCRIPTOR).unwrap();
        let mut scene = SceneTree::new();
        add_to_scene(descriptor, &mut scene, None);

        assert_eq!(scene.len(), 1);
        let mut seen = None;
        scene.for_each_pre_order(|_, node| {
            if let SceneNode::Line { data, style, .. } = node {
                seen = Some((data.shader.clone(), style.width, style.stipple_pattern));
            }
        });
        let (shader, width, pattern) = seen.unwrap();
        assert_eq!(shader, "unlit_colored");
        assert_eq!(width, 2.0);
        assert_eq!(pattern, 0x00ff);
    }

    #[test]
    fn world_matrix_columns_map_to_translation() {
        let descriptor: ObjectDescriptor = serde_json::from_str(LINE_DESCRIPTOR).unwrap();
        let mut scene = SceneTree::new();
        add_to_scene(descriptor, &mut scene, None);

        scene.for_each_pre_order(|_, node| {
            if let Some(data) = node.leaf() {
                assert_eq!(data.world.w_axis, glam::Vec4::new(4.0, 5.0, 6.0, 1.0));
            }
        });
    }

    #[test]
    fn composites_group_their_sub_meshes() {
        let json = format!(
            r#"{{"type": "LaneRenderObject", "sub_mesh": [{LINE_DESCRIPTOR}, {LINE_DESCRIPTOR}]}}"#
        );
        let descriptor: ObjectDescriptor = serde_json::from_str(&json).unwrap();
        let mut scene = SceneTree::new();
        add_to_scene(descriptor, &mut scene, None);

        // One group plus two line leaves.
        assert_eq!(scene.len(), 3);
    }

    #[test]
    fn unknown_types_and_incomplete_leaves_are_skipped() {
        let mut scene = SceneTree::new();

        let unknown: ObjectDescriptor =
            serde_json::from_str(r#"{"type": "TeapotObject"}"#).unwrap();
        add_to_scene(unknown, &mut scene, None);

        let incomplete: ObjectDescriptor =
            serde_json::from_str(r#"{"type": "LineObject"}"#).unwrap();
        add_to_scene(incomplete, &mut scene, None);

        assert!(scene.is_empty());
    }

    #[test]
    fn mesh_channels_feed_the_attribute_mask() {
        let json = r#"{
            "type": "SimpleTexturedObject",
            "draw_info": {
                "shader": "simple_textured_object",
                "world_matrix": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                "draw_mode": 4,
                "alpha": 0.5
            },
            "mesh": {
                "position": [[0,0,0],[1,0,0],[1,1,0]],
                "uv": [[0,0],[1,0],[1,1]]
            }
        }"#;
        let descriptor: ObjectDescriptor = serde_json::from_str(json).unwrap();
        let mut scene = SceneTree::new();
        add_to_scene(descriptor, &mut scene, None);

        scene.for_each_pre_order(|_, node| {
            if let Some(data) = node.leaf() {
                assert!(data.mesh.attrib_mask().contains(AttribMask::UV));
                assert!(!data.mesh.attrib_mask().contains(AttribMask::COLOR));
            }
        });
    }

    #[test]
    fn directory_load_merges_files_in_sorted_order() {
        let dir = std::env::temp_dir().join(format!(
            "drawstream-loader-test-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b_object.json"), LINE_DESCRIPTOR).unwrap();
        fs::write(
            dir.join("a_object.json"),
            r#"{"type": "LaneRenderObject", "sub_mesh": []}"#,
        )
        .unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();

        let scene = load_directory(&dir).unwrap();
        fs::remove_dir_all(&dir).ok();

        // The group from a_object.json sorts first, the line follows, the
        // broken file is skipped.
        assert_eq!(scene.len(), 2);
        let mut kinds = Vec::new();
        scene.for_each_pre_order(|_, node| {
            kinds.push(matches!(node, SceneNode::Group));
        });
        assert_eq!(kinds, vec![true, true, false]);
    }
}
