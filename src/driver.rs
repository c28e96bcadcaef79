//! The narrow seam between the engine and the vendor driver.
//!
//! Everything the token engine asks of the GPU goes through the [`Driver`]
//! trait: buffer allocation and residency, pipeline-state application and
//! capture, token headers, replay submission, bindless texture handles and
//! framebuffer plumbing. The engine itself never holds a GL context; a
//! real implementation wraps one, and [`crate::recording::RecordingDriver`]
//! models one in memory for headless validation.

use crate::mesh::{AttribMask, TopologyClass};
use crate::token::TokenKind;

/// Name of the command-token/command-list extension.
pub const EXT_COMMAND_LIST: &str = "GL_NV_command_list";
/// Name of the bindless-texture extension.
pub const EXT_BINDLESS_TEXTURE: &str = "GL_ARB_bindless_texture";
/// Name of the buffer GPU-address extension.
pub const EXT_SHADER_BUFFER_LOAD: &str = "GL_NV_shader_buffer_load";

/// Extensions the whole engine is gated on. If any is missing the engine
/// constructor fails and no token is ever compiled.
pub const REQUIRED_EXTENSIONS: [&str; 3] = [
    EXT_COMMAND_LIST,
    EXT_BINDLESS_TEXTURE,
    EXT_SHADER_BUFFER_LOAD,
];

/// A driver buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// A captured pipeline-state object realized by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHandle(pub u32);

/// A framebuffer object. `FramebufferHandle::DEFAULT` is the window-system
/// provided target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferHandle(pub u32);

impl FramebufferHandle {
    pub const DEFAULT: Self = Self(0);
}

/// A texture object (not yet addressable from shaders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// A 64-bit bindless texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureGpuHandle(pub u64);

/// A raw 64-bit GPU virtual address of a resident buffer.
///
/// Addresses are only stable while the backing allocation is stable;
/// reallocating a buffer invalidates every address previously fetched for
/// it (see [`crate::engine::buffers::GpuBuffer`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuAddress(pub u64);

impl GpuAddress {
    /// Byte-offset arithmetic within one allocation.
    #[inline]
    pub fn offset(self, bytes: u64) -> GpuAddress {
        GpuAddress(self.0 + bytes)
    }
}

/// A linked shader program. The registry hands out `NULL` for unknown
/// names; callers treat it as "draw without a program" rather than an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProgramHandle(pub u32);

impl ProgramHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A driver command-list object (the baked form of a token stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandListHandle(pub u32);

/// Shader stages addressable from uniform-address tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Line-stipple configuration as applied to the live context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StippleParams {
    pub factor: i32,
    pub pattern: u16,
}

/// Which attachment a fallback-target texture backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Color,
    DepthStencil,
}

/// Completeness of a framebuffer after attaching targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete,
}

/// Device limits the engine sizes its layouts against.
#[derive(Debug, Clone, Copy)]
pub struct DriverLimits {
    /// Minimum alignment for independently bindable uniform-buffer ranges.
    pub uniform_buffer_offset_alignment: u64,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self {
            uniform_buffer_offset_alignment: 256,
        }
    }
}

/// One replay submission: four parallel slices of equal length, one entry
/// per draw. `offsets[i]` and `sizes[i]` delimit the token run for draw
/// `i` inside the stream buffer; `states[i]` is the captured state it runs
/// under and `fbos[i]` the framebuffer it targets.
#[derive(Debug, Clone, Copy)]
pub struct TokenSegments<'a> {
    pub offsets: &'a [u64],
    pub sizes: &'a [u32],
    pub states: &'a [StateHandle],
    pub fbos: &'a [FramebufferHandle],
}

impl TokenSegments<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// The vendor driver surface consumed by the engine.
///
/// Calls mirror the underlying extension entry points one-to-one, so a real
/// implementation is a thin unsafe shim over a loaded context. All calls
/// must come from the one thread owning that context.
pub trait Driver {
    /// One-time capability probe.
    fn is_extension_supported(&self, name: &str) -> bool;

    fn limits(&self) -> DriverLimits;

    // --- Buffers ------------------------------------------------------

    fn create_buffer(&mut self) -> BufferId;

    /// (Re)allocates backing storage. Existing contents are discarded and
    /// any previously fetched GPU address for this buffer becomes invalid.
    fn allocate_buffer(&mut self, buffer: BufferId, size: u64);

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]);

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Makes the buffer GPU-resident read-only and returns its virtual
    /// address. Valid until the next `allocate_buffer` on the same id.
    fn make_buffer_resident(&mut self, buffer: BufferId) -> GpuAddress;

    // --- Live pipeline state (mutated during state capture) -----------

    fn use_program(&mut self, program: ProgramHandle);

    /// `Some` enables and configures stipple, `None` disables it.
    fn set_line_stipple(&mut self, stipple: Option<StippleParams>);

    fn configure_vertex_attribs(&mut self, mask: AttribMask);

    // --- Captured state objects ---------------------------------------

    /// Captures the currently applied pipeline state into a new state
    /// object for the given draw-topology class.
    fn capture_state(&mut self, topology: TopologyClass) -> StateHandle;

    fn delete_states(&mut self, states: &[StateHandle]);

    // --- Token stream metadata ----------------------------------------

    /// Driver encoding of a token record header for `kind`. The encoding
    /// is opaque to the engine; it embeds the record kind and byte size.
    fn token_header(&self, kind: TokenKind) -> u32;

    /// Driver index for a shader stage as used in uniform-address tokens.
    fn stage_index(&self, stage: ShaderStage) -> u16;

    // --- Replay -------------------------------------------------------

    /// Submits token runs from a GPU-resident stream buffer in one call.
    fn draw_token_segments(&mut self, stream: BufferId, segments: TokenSegments<'_>);

    // --- Native command lists -----------------------------------------

    fn create_command_list(&mut self) -> CommandListHandle;

    /// Records client-memory token runs into the list.
    fn list_token_segments(
        &mut self,
        list: CommandListHandle,
        stream: &[u8],
        segments: TokenSegments<'_>,
    );

    fn compile_command_list(&mut self, list: CommandListHandle);

    fn call_command_list(&mut self, list: CommandListHandle);

    fn delete_command_list(&mut self, list: CommandListHandle);

    // --- Framebuffers and bindless textures ---------------------------

    fn create_framebuffer(&mut self) -> FramebufferHandle;

    fn delete_framebuffer(&mut self, fbo: FramebufferHandle);

    /// The framebuffer currently bound for drawing.
    fn bound_draw_framebuffer(&self) -> FramebufferHandle;

    fn bind_framebuffer(&mut self, fbo: FramebufferHandle);

    fn create_multisampled_texture(
        &mut self,
        kind: AttachmentKind,
        width: u32,
        height: u32,
        samples: u32,
    ) -> TextureId;

    fn delete_texture(&mut self, texture: TextureId);

    fn texture_gpu_handle(&mut self, texture: TextureId) -> TextureGpuHandle;

    fn make_texture_handle_resident(&mut self, handle: TextureGpuHandle);

    fn make_texture_handle_non_resident(&mut self, handle: TextureGpuHandle);

    /// Attaches color + depth/stencil targets and reports completeness.
    fn attach_framebuffer_targets(
        &mut self,
        fbo: FramebufferHandle,
        color: TextureId,
        depth_stencil: TextureId,
    ) -> FramebufferStatus;

    /// Sample count of the currently bound draw framebuffer. The window
    /// system may change this for the default framebuffer at runtime.
    fn current_sample_count(&self) -> u32;

    /// Color-only, nearest-neighbor blit between equally sized targets.
    fn blit_framebuffer(
        &mut self,
        src: FramebufferHandle,
        dst: FramebufferHandle,
        width: u32,
        height: u32,
    );
}
