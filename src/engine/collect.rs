//! One pass over the scene forest, producing the per-object data the
//! compiler consumes: three parallel vectors (uniform records, originating
//! node ids, state fingerprints), one entry per drawable object, in
//! traversal order.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use log::warn;

use crate::cache::StateFingerprint;
use crate::scene::SceneTree;
use crate::shaders::ShaderRegistry;

/// Per-object uniform record as laid out for the shaders: a world matrix
/// and a kind-specific color/alpha payload. Written into the object
/// uniform buffer at the device's bindable-range alignment, not at its
/// natural size.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub color: Vec4,
}

/// Scene-global uniform record, updated once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SceneUniforms {
    pub view_proj: Mat4,
}

/// Material record: a resident bindless texture handle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialRecord {
    pub texture: u64,
}

/// Collector output. The three vectors share index space.
#[derive(Debug, Default)]
pub struct CollectedObjects {
    pub uniforms: Vec<ObjectUniforms>,
    pub node_ids: Vec<usize>,
    pub fingerprints: Vec<StateFingerprint>,
}

impl CollectedObjects {
    pub fn len(&self) -> usize {
        self.uniforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uniforms.is_empty()
    }
}

/// Walks the forest pre-order. Group nodes are traversed through
/// unconditionally; each drawable leaf contributes one entry, provided its
/// mesh has been uploaded (a leaf without GPU buffers is skipped, not an
/// error). Output order is a fixed function of traversal order.
pub fn collect_objects(scene: &SceneTree, registry: &ShaderRegistry) -> CollectedObjects {
    let mut collected = CollectedObjects::default();

    scene.for_each_pre_order(|node_id, node| {
        if !node.contributes_draw() {
            return;
        }
        let data = match node.leaf() {
            Some(data) => data,
            None => return,
        };
        if data.mesh.gpu().is_none() {
            warn!("scene node {node_id} has no uploaded mesh, skipping");
            return;
        }

        let program = registry.lookup_uniform_variant(&data.shader);
        let fingerprint = StateFingerprint::new(
            data.mesh.topology().class(),
            program,
            data.mesh.attrib_mask(),
        )
        .with_stipple(node.line_style().and_then(|style| style.stipple_params()));

        collected.uniforms.push(ObjectUniforms {
            model: data.world,
            color: node.uniform_color().unwrap_or(Vec4::ONE),
        });
        collected.node_ids.push(node_id);
        collected.fingerprints.push(fingerprint);
    });

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ProgramHandle;
    use crate::mesh::{Mesh, PrimitiveTopology, TopologyClass};
    use crate::recording::RecordingDriver;
    use crate::scene::{LeafData, LineStyle, SceneNode, SceneTree};
    use glam::Vec3;

    fn mesh(topology: PrimitiveTopology) -> Mesh {
        Mesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], topology)
    }

    fn registry() -> ShaderRegistry {
        let mut registry = ShaderRegistry::new();
        registry.register("unlit_colored_uniform", ProgramHandle(11));
        registry.register("simple_textured_object_uniform", ProgramHandle(12));
        registry
    }

    #[test]
    fn object_uniform_record_is_eighty_bytes() {
        assert_eq!(core::mem::size_of::<ObjectUniforms>(), 80);
    }

    #[test]
    fn leaves_produce_parallel_entries_in_traversal_order() {
        let mut scene = SceneTree::new();
        let group = scene.add(SceneNode::Group, None);
        scene.add(
            SceneNode::Line {
                data: LeafData::new(
                    "unlit_colored",
                    Mat4::IDENTITY,
                    mesh(PrimitiveTopology::LineStrip),
                ),
                style: LineStyle::stippled(2.0, 1, 0x00ff),
                color: Vec4::ONE,
            },
            Some(group),
        );
        scene.add(
            SceneNode::Textured {
                data: LeafData::new(
                    "simple_textured_object",
                    Mat4::IDENTITY,
                    mesh(PrimitiveTopology::Triangles).with_uvs(vec![glam::Vec2::ZERO; 3]),
                ),
                alpha: 0.5,
            },
            None,
        );

        let mut driver = RecordingDriver::new();
        scene.upload_meshes(&mut driver);
        let collected = collect_objects(&scene, &registry());

        assert_eq!(collected.len(), 2);
        assert_eq!(collected.uniforms.len(), collected.node_ids.len());
        assert_eq!(collected.uniforms.len(), collected.fingerprints.len());

        let line = &collected.fingerprints[0];
        assert_eq!(line.topology, TopologyClass::Lines);
        assert_eq!(line.program, ProgramHandle(11));
        assert_eq!(line.stipple.unwrap().pattern, 0x00ff);

        let textured = &collected.fingerprints[1];
        assert_eq!(textured.topology, TopologyClass::Triangles);
        assert_eq!(textured.program, ProgramHandle(12));
        assert!(textured.stipple.is_none());
        assert_eq!(collected.uniforms[1].color, Vec4::splat(0.5));
    }

    #[test]
    fn unknown_shader_yields_null_program_without_failing() {
        let mut scene = SceneTree::new();
        scene.add(
            SceneNode::DashedStripe {
                data: LeafData::new(
                    "no_such_shader",
                    Mat4::IDENTITY,
                    mesh(PrimitiveTopology::Triangles),
                ),
                color: Vec4::ONE,
            },
            None,
        );

        let mut driver = RecordingDriver::new();
        scene.upload_meshes(&mut driver);
        let collected = collect_objects(&scene, &registry());

        assert_eq!(collected.len(), 1);
        assert!(collected.fingerprints[0].program.is_null());
    }

    #[test]
    fn leaves_without_uploaded_meshes_are_skipped() {
        let mut scene = SceneTree::new();
        scene.add(
            SceneNode::DashedStripe {
                data: LeafData::new(
                    "unlit_colored",
                    Mat4::IDENTITY,
                    mesh(PrimitiveTopology::Triangles),
                ),
                color: Vec4::ONE,
            },
            None,
        );

        // No upload pass: the leaf has no GPU buffers yet.
        let collected = collect_objects(&scene, &registry());
        assert!(collected.is_empty());
    }
}
