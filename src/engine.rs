//! The token engine: compiles the scene into a binary command-token
//! stream once, then replays it every frame with a single driver call.
//!
//! Construction is gated on the driver's extension set; a driver without
//! the bindless/command-list extensions never gets an engine, and callers
//! fall back to their own simpler draw paths.

pub mod buffers;
pub mod collect;
mod compile;
mod framebuffer;
mod replay;

use std::ops::Range;

use glam::Mat4;
use log::{info, warn};
use thiserror::Error;

use crate::cache::StateCache;
use crate::driver::{
    CommandListHandle, Driver, FramebufferHandle, GpuAddress, ShaderStage, StateHandle,
    TextureGpuHandle, TokenSegments, REQUIRED_EXTENSIONS,
};
use crate::scene::SceneTree;
use crate::shaders::ShaderRegistry;
use crate::token::TokenWriter;

use buffers::{align_up, GpuBuffer};
use collect::{collect_objects, MaterialRecord, ObjectUniforms, SceneUniforms};
pub use framebuffer::FallbackTarget;

/// Uniform-buffer slot of the scene-global record.
pub const UBO_SCENE: u16 = 0;
/// Uniform-buffer slot of the per-object record.
pub const UBO_OBJECT: u16 = 1;
/// Uniform-buffer slot of the material record.
pub const UBO_MATERIAL: u16 = 2;

/// Number of preloaded material slots bound round-robin to textured draws.
pub const MATERIAL_SLOTS: u64 = 2;

/// The engine cannot run on this driver.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("required driver extensions not supported: {0:?}")]
    MissingExtensions(Vec<String>),
}

/// Four parallel sequences describing the compiled stream, one entry per
/// drawable object: byte offset and length of its token run, the captured
/// state it replays under, and its target framebuffer.
///
/// Invariant: runs are packed, `offsets[i] + sizes[i] == offsets[i + 1]`.
#[derive(Debug, Default)]
pub struct TokenSequence {
    offsets: Vec<u64>,
    sizes: Vec<u32>,
    states: Vec<StateHandle>,
    fbos: Vec<FramebufferHandle>,
}

impl TokenSequence {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn states(&self) -> &[StateHandle] {
        &self.states
    }

    pub fn fbos(&self) -> &[FramebufferHandle] {
        &self.fbos
    }

    fn clear(&mut self) {
        self.offsets.clear();
        self.sizes.clear();
        self.states.clear();
        self.fbos.clear();
    }

    fn push(&mut self, offset: u64, size: u32, state: StateHandle, fbo: FramebufferHandle) {
        self.offsets.push(offset);
        self.sizes.push(size);
        self.states.push(state);
        self.fbos.push(fbo);
    }

    /// Borrowed view over a contiguous sub-range of all four sequences.
    pub fn segments(&self, range: Range<usize>) -> TokenSegments<'_> {
        TokenSegments {
            offsets: &self.offsets[range.clone()],
            sizes: &self.sizes[range.clone()],
            states: &self.states[range.clone()],
            fbos: &self.fbos[range],
        }
    }
}

/// Counters surfaced for diagnostics overlays.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub captured_states: usize,
    pub token_runs: usize,
    pub token_buffer_bytes: usize,
    pub object_buffer_bytes: u64,
}

pub struct TokenEngine {
    state_cache: StateCache,
    writer: TokenWriter,
    sequence: TokenSequence,
    compiled: bool,
    /// Round-robin material slot selector, reset at the start of every
    /// compile pass.
    material_flip: bool,

    object_buffer: GpuBuffer,
    scene_buffer: GpuBuffer,
    material_buffer: GpuBuffer,
    stream_buffer: GpuBuffer,

    object_stride: u64,
    material_stride: u64,
    scene_address: GpuAddress,
    material_address: GpuAddress,

    fallback: FallbackTarget,
    native_list: Option<CommandListHandle>,
}

impl TokenEngine {
    /// Probes the driver and sets up the engine's GPU resources.
    ///
    /// Fails with [`CapabilityError`] when any required extension is
    /// absent; in that case no engine resource is created and the token
    /// path must not be used at all.
    pub fn new(driver: &mut dyn Driver, width: u32, height: u32) -> Result<Self, CapabilityError> {
        let missing: Vec<String> = REQUIRED_EXTENSIONS
            .iter()
            .filter(|name| !driver.is_extension_supported(name))
            .map(|name| (*name).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(CapabilityError::MissingExtensions(missing));
        }

        let alignment = driver.limits().uniform_buffer_offset_alignment;
        let object_stride = align_up(core::mem::size_of::<ObjectUniforms>() as u64, alignment);
        let material_stride = align_up(core::mem::size_of::<MaterialRecord>() as u64, alignment);

        let mut scene_buffer = GpuBuffer::new(driver);
        scene_buffer.ensure_capacity(driver, core::mem::size_of::<SceneUniforms>() as u64);
        let scene_address = scene_buffer.resident_address(driver);

        let mut material_buffer = GpuBuffer::new(driver);
        material_buffer.ensure_capacity(driver, material_stride * MATERIAL_SLOTS);
        let material_address = material_buffer.resident_address(driver);

        let object_buffer = GpuBuffer::new(driver);
        let stream_buffer = GpuBuffer::new(driver);
        let fallback = FallbackTarget::new(driver, width, height);

        info!(
            "token engine initialized ({}x{}, object stride {} bytes)",
            width, height, object_stride
        );

        Ok(Self {
            state_cache: StateCache::new(),
            writer: TokenWriter::new(),
            sequence: TokenSequence::default(),
            compiled: false,
            material_flip: false,
            object_buffer,
            scene_buffer,
            material_buffer,
            stream_buffer,
            object_stride,
            material_stride,
            scene_address,
            material_address,
            fallback,
            native_list: None,
        })
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn sequence(&self) -> &TokenSequence {
        &self.sequence
    }

    /// The assembled token stream bytes (as uploaded to the GPU).
    pub fn token_bytes(&self) -> &[u8] {
        self.writer.bytes()
    }

    pub fn fallback(&self) -> &FallbackTarget {
        &self.fallback
    }

    pub fn object_stride(&self) -> u64 {
        self.object_stride
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            captured_states: self.state_cache.len(),
            token_runs: self.sequence.len(),
            token_buffer_bytes: self.writer.len(),
            object_buffer_bytes: self.object_buffer.size(),
        }
    }

    /// Uploads the frame's combined view-projection matrix to the
    /// scene-global uniform slot.
    pub fn update_scene_uniforms(&mut self, driver: &mut dyn Driver, view_proj: Mat4) {
        self.scene_buffer.write(
            driver,
            0,
            bytemuck::bytes_of(&SceneUniforms { view_proj }),
        );
    }

    /// Makes the two material textures resident and writes their bindless
    /// handles into the material slots.
    pub fn set_materials(&mut self, driver: &mut dyn Driver, textures: [TextureGpuHandle; 2]) {
        let mut staging = vec![0u8; (self.material_stride * MATERIAL_SLOTS) as usize];
        for (slot, texture) in textures.into_iter().enumerate() {
            driver.make_texture_handle_resident(texture);
            let record = MaterialRecord { texture: texture.0 };
            let start = slot * self.material_stride as usize;
            staging[start..start + core::mem::size_of::<MaterialRecord>()]
                .copy_from_slice(bytemuck::bytes_of(&record));
        }
        self.material_buffer.write(driver, 0, &staging);
    }

    /// Discards the compiled stream (and any native command list built
    /// from it) so the next [`TokenEngine::compile`] re-records the scene.
    pub fn invalidate(&mut self, driver: &mut dyn Driver) {
        self.compiled = false;
        self.sequence.clear();
        self.writer.clear();
        if let Some(list) = self.native_list.take() {
            driver.delete_command_list(list);
        }
    }

    /// Binds the fallback target for token rendering. Call once per frame
    /// before replaying.
    pub fn bind_for_capture(&mut self, driver: &mut dyn Driver) {
        self.fallback.bind_for_capture(driver);
    }

    /// Blits the fallback color buffer to whatever framebuffer was bound
    /// before capture began.
    pub fn blit_to_target(&mut self, driver: &mut dyn Driver) {
        self.fallback.blit_to_target(driver);
    }

    /// Resizes the fallback target to the new viewport.
    pub fn resize(&mut self, driver: &mut dyn Driver, width: u32, height: u32) {
        self.fallback.resize(driver, width, height);
    }

    /// Releases every GPU resource the engine owns: all captured states in
    /// one batched call, the fallback target, and the engine's buffers.
    pub fn finalize(mut self, driver: &mut dyn Driver) {
        if let Some(list) = self.native_list.take() {
            driver.delete_command_list(list);
        }
        self.state_cache.finalize(driver);
        self.fallback.finalize(driver);
        self.object_buffer.delete(driver);
        self.scene_buffer.delete(driver);
        self.material_buffer.delete(driver);
        self.stream_buffer.delete(driver);
    }
}
