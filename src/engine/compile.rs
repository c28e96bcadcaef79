use super::*;

use crate::mesh::INDEX_BYTE_SIZE;
use crate::shaders::TEXTURED_SHADER_NAME;
use crate::token::{
    AttributeAddressToken, DrawArraysInstancedToken, DrawElementsInstancedToken,
    ElementAddressToken, LineWidthToken, TokenKind, UniformAddressToken,
};

/// Device-unit clamp applied to styled line widths.
const LINE_WIDTH_RANGE: (f32, f32) = (0.5, 10.0);

/// Driver header values, fetched once per compile pass.
struct TokenHeaders {
    uniform: u32,
    attribute: u32,
    element: u32,
    line_width: u32,
    draw_elements: u32,
    draw_arrays: u32,
}

impl TokenHeaders {
    fn fetch(driver: &dyn Driver) -> Self {
        Self {
            uniform: driver.token_header(TokenKind::UniformAddress),
            attribute: driver.token_header(TokenKind::AttributeAddress),
            element: driver.token_header(TokenKind::ElementAddress),
            line_width: driver.token_header(TokenKind::LineWidth),
            draw_elements: driver.token_header(TokenKind::DrawElementsInstanced),
            draw_arrays: driver.token_header(TokenKind::DrawArraysInstanced),
        }
    }
}

impl TokenEngine {
    /// Compiles the scene into the token stream. Memoized: once compiled,
    /// further calls are no-ops until [`TokenEngine::invalidate`].
    ///
    /// An empty forest compiles to a zero-length sequence; that is legal
    /// and replays as a no-op.
    pub fn compile(
        &mut self,
        driver: &mut dyn Driver,
        scene: &SceneTree,
        registry: &ShaderRegistry,
    ) {
        if self.compiled {
            return;
        }

        let collected = collect_objects(scene, registry);
        let object_count = collected.len();

        self.writer.clear();
        self.sequence.clear();
        self.material_flip = false;

        if object_count > 0 {
            // The address may only be fetched once the allocation is
            // stable for this pass; growth above invalidates it.
            self.object_buffer
                .ensure_capacity(driver, object_count as u64 * self.object_stride);
            let object_base = self.object_buffer.resident_address(driver);

            let mut staging = vec![0u8; object_count * self.object_stride as usize];
            for (index, uniforms) in collected.uniforms.iter().enumerate() {
                let start = index * self.object_stride as usize;
                staging[start..start + core::mem::size_of::<ObjectUniforms>()]
                    .copy_from_slice(bytemuck::bytes_of(uniforms));
            }
            self.object_buffer.write(driver, 0, &staging);

            let headers = TokenHeaders::fetch(driver);
            let vertex_stage = driver.stage_index(ShaderStage::Vertex);
            let fragment_stage = driver.stage_index(ShaderStage::Fragment);
            let textured_program = registry.lookup(TEXTURED_SHADER_NAME);
            let fallback_fbo = self.fallback.framebuffer();

            for index in 0..object_count {
                let fingerprint = collected.fingerprints[index];
                let state = self.state_cache.resolve(driver, fingerprint);

                let node = scene
                    .get(collected.node_ids[index])
                    .and_then(|node| node.leaf().map(|data| (node, data)));
                let Some((node, data)) = node else {
                    warn!(
                        "collected node {} vanished from the scene, skipping",
                        collected.node_ids[index]
                    );
                    continue;
                };
                let Some(gpu) = data.mesh.gpu() else {
                    continue;
                };

                self.writer.begin_run();

                let object_address = object_base.offset(index as u64 * self.object_stride);
                for (slot, address) in [(UBO_OBJECT, object_address), (UBO_SCENE, self.scene_address)]
                {
                    for stage in [vertex_stage, fragment_stage] {
                        self.writer.push(UniformAddressToken {
                            header: headers.uniform,
                            slot,
                            stage,
                            address: address.0,
                        });
                    }
                }

                // Textured draws alternate between the two material slots.
                // An unresolved (null) program never matches.
                if !fingerprint.program.is_null() && fingerprint.program == textured_program {
                    let slot_offset = if self.material_flip {
                        self.material_stride
                    } else {
                        0
                    };
                    let material_address = self.material_address.offset(slot_offset);
                    for stage in [vertex_stage, fragment_stage] {
                        self.writer.push(UniformAddressToken {
                            header: headers.uniform,
                            slot: UBO_MATERIAL,
                            stage,
                            address: material_address.0,
                        });
                    }
                    self.material_flip = !self.material_flip;
                }

                self.writer.push(AttributeAddressToken {
                    header: headers.attribute,
                    index: 0,
                    address: gpu.vertex_address.0,
                });

                if let Some(index_address) = gpu.index_address {
                    self.writer.push(ElementAddressToken {
                        header: headers.element,
                        address: index_address.0,
                        index_byte_size: INDEX_BYTE_SIZE,
                    });
                }

                if let Some(style) = node.line_style() {
                    self.writer.push(LineWidthToken {
                        header: headers.line_width,
                        width: style.width.clamp(LINE_WIDTH_RANGE.0, LINE_WIDTH_RANGE.1),
                    });
                }

                let mode = data.mesh.topology().raw();
                if gpu.index_address.is_some() {
                    self.writer.push(DrawElementsInstancedToken {
                        header: headers.draw_elements,
                        mode,
                        count: data.mesh.index_count(),
                        instance_count: 1,
                        first_index: 0,
                        base_vertex: 0,
                        base_instance: 0,
                    });
                } else {
                    self.writer.push(DrawArraysInstancedToken {
                        header: headers.draw_arrays,
                        mode,
                        count: data.mesh.vertex_count(),
                        instance_count: 1,
                        first: 0,
                        base_instance: 0,
                    });
                }

                let (offset, size) = self.writer.end_run();
                self.sequence.push(offset, size, state, fallback_fbo);
            }
        }

        self.stream_buffer.upload(driver, self.writer.bytes());
        self.compiled = true;

        info!(
            "compiled {} token runs into {} bytes ({} captured states)",
            self.sequence.len(),
            self.writer.len(),
            self.state_cache.len()
        );
    }
}
