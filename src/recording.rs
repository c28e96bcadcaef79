//! An in-memory [`Driver`] for headless validation.
//!
//! Models just enough of the vendor driver to exercise the engine without
//! a GPU: buffers with contents and reallocation-sensitive addresses,
//! captured states that snapshot the applied pipeline configuration, and a
//! record of every replay submission. Used by the crate's own tests and
//! usable by embedders for CI environments with no suitable adapter, in
//! the same spirit as a headless renderer.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};

use crate::driver::{
    AttachmentKind, BufferId, CommandListHandle, Driver, DriverLimits, FramebufferHandle,
    FramebufferStatus, GpuAddress, ProgramHandle, ShaderStage, StateHandle, StippleParams,
    TextureGpuHandle, TextureId, TokenSegments, REQUIRED_EXTENSIONS,
};
use crate::mesh::{AttribMask, TopologyClass};
use crate::token::{
    AttributeAddressToken, DrawArraysInstancedToken, DrawElementsInstancedToken,
    ElementAddressToken, LineWidthToken, TokenKind, UniformAddressToken,
};

const ADDRESS_SPACE_BASE: u64 = 0x1000_0000_0000;
const ADDRESS_STRIDE_PER_BUFFER: u64 = 0x1_0000_0000;
const ADDRESS_STRIDE_PER_GENERATION: u64 = 0x0100_0000;

/// Backing storage and residency of one mock buffer.
#[derive(Debug, Default)]
pub struct BufferRecord {
    pub size: u64,
    pub data: Vec<u8>,
    /// Bumped on every reallocation; the derived GPU address moves with it.
    pub generation: u32,
    pub address: Option<GpuAddress>,
    pub deleted: bool,
}

/// Pipeline configuration snapshotted by `capture_state`.
#[derive(Debug, Clone, Copy)]
pub struct CapturedState {
    pub program: ProgramHandle,
    pub stipple: Option<StippleParams>,
    pub attrib_mask: AttribMask,
    pub topology: TopologyClass,
}

/// One `draw_token_segments` submission, arrays copied out.
#[derive(Debug, Clone)]
pub struct RecordedDraw {
    pub stream: BufferId,
    pub offsets: Vec<u64>,
    pub sizes: Vec<u32>,
    pub states: Vec<StateHandle>,
    pub fbos: Vec<FramebufferHandle>,
}

#[derive(Debug, Clone)]
pub struct TextureRecord {
    pub kind: AttachmentKind,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub handle: TextureGpuHandle,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordedBlit {
    pub src: FramebufferHandle,
    pub dst: FramebufferHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct CommandListRecord {
    pub segment_count: usize,
    pub stream_len: usize,
    pub compiled: bool,
    pub calls: usize,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
struct FramebufferRecord {
    attachments: Option<(TextureId, TextureId)>,
}

/// A token record decoded back out of a compiled stream.
#[derive(Debug, Clone, Copy)]
pub enum DecodedToken {
    UniformAddress(UniformAddressToken),
    AttributeAddress(AttributeAddressToken),
    ElementAddress(ElementAddressToken),
    LineWidth(LineWidthToken),
    DrawElementsInstanced(DrawElementsInstancedToken),
    DrawArraysInstanced(DrawArraysInstancedToken),
}

pub struct RecordingDriver {
    extensions: HashSet<String>,
    limits: DriverLimits,

    next_buffer: u32,
    buffers: HashMap<BufferId, BufferRecord>,

    applied_program: ProgramHandle,
    applied_stipple: Option<StippleParams>,
    applied_attribs: AttribMask,

    next_state: u32,
    states: HashMap<StateHandle, CapturedState>,
    deleted_states: HashSet<StateHandle>,
    deleted_state_batches: usize,

    draws: Vec<RecordedDraw>,

    next_framebuffer: u32,
    framebuffers: HashMap<FramebufferHandle, FramebufferRecord>,
    bound_framebuffer: FramebufferHandle,
    sample_count: u32,

    next_texture: u32,
    textures: HashMap<TextureId, TextureRecord>,
    resident_texture_handles: HashSet<TextureGpuHandle>,
    deleted_while_resident: Vec<TextureId>,

    next_command_list: u32,
    command_lists: HashMap<CommandListHandle, CommandListRecord>,

    blits: Vec<RecordedBlit>,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    /// A driver advertising every required extension.
    pub fn new() -> Self {
        Self::with_extensions(REQUIRED_EXTENSIONS)
    }

    pub fn with_extensions<'a>(extensions: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            extensions: extensions.into_iter().map(str::to_owned).collect(),
            limits: DriverLimits::default(),
            next_buffer: 1,
            buffers: HashMap::new(),
            applied_program: ProgramHandle::NULL,
            applied_stipple: None,
            applied_attribs: AttribMask::default(),
            next_state: 1,
            states: HashMap::new(),
            deleted_states: HashSet::new(),
            deleted_state_batches: 0,
            draws: Vec::new(),
            next_framebuffer: 1,
            framebuffers: HashMap::new(),
            bound_framebuffer: FramebufferHandle::DEFAULT,
            sample_count: 8,
            next_texture: 1,
            textures: HashMap::new(),
            resident_texture_handles: HashSet::new(),
            deleted_while_resident: Vec::new(),
            next_command_list: 1,
            command_lists: HashMap::new(),
            blits: Vec::new(),
        }
    }

    /// A driver missing `name`, for exercising the capability gate.
    pub fn without_extension(name: &str) -> Self {
        let mut driver = Self::new();
        driver.extensions.remove(name);
        driver
    }

    // --- Inspection ---------------------------------------------------

    pub fn buffer(&self, buffer: BufferId) -> Option<&BufferRecord> {
        self.buffers.get(&buffer)
    }

    /// Resolves a GPU virtual address back to the buffer and byte offset
    /// it points into, if any current allocation covers it.
    pub fn find_buffer_by_address(&self, address: GpuAddress) -> Option<(BufferId, u64)> {
        self.buffers.iter().find_map(|(&id, record)| {
            let base = record.address?;
            (address.0 >= base.0 && address.0 < base.0 + record.size.max(1))
                .then(|| (id, address.0 - base.0))
        })
    }

    pub fn captured_state(&self, handle: StateHandle) -> Option<&CapturedState> {
        self.states.get(&handle)
    }

    pub fn live_state_count(&self) -> usize {
        self.states.len() - self.deleted_states.len()
    }

    pub fn deleted_state_batches(&self) -> usize {
        self.deleted_state_batches
    }

    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    pub fn applied_stipple(&self) -> Option<StippleParams> {
        self.applied_stipple
    }

    /// Overrides the sample count subsequently reported for the bound
    /// framebuffer, as a window system might between frames.
    pub fn set_sample_count(&mut self, samples: u32) {
        self.sample_count = samples;
    }

    pub fn texture(&self, texture: TextureId) -> Option<&TextureRecord> {
        self.textures.get(&texture)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.values().filter(|record| !record.deleted).count()
    }

    /// Textures that were deleted while their bindless handle was still
    /// resident (undefined behavior on real drivers, so tests assert this
    /// stays empty).
    pub fn textures_deleted_while_resident(&self) -> &[TextureId] {
        &self.deleted_while_resident
    }

    pub fn is_texture_handle_resident(&self, handle: TextureGpuHandle) -> bool {
        self.resident_texture_handles.contains(&handle)
    }

    /// The color and depth/stencil textures currently attached to `fbo`.
    pub fn framebuffer_attachments(
        &self,
        fbo: FramebufferHandle,
    ) -> Option<(TextureId, TextureId)> {
        self.framebuffers.get(&fbo).and_then(|record| record.attachments)
    }

    pub fn blits(&self) -> &[RecordedBlit] {
        &self.blits
    }

    pub fn command_list(&self, list: CommandListHandle) -> Option<&CommandListRecord> {
        self.command_lists.get(&list)
    }

    fn header_for(kind: TokenKind) -> u32 {
        let kind_bits = match kind {
            TokenKind::UniformAddress => 1,
            TokenKind::AttributeAddress => 2,
            TokenKind::ElementAddress => 3,
            TokenKind::LineWidth => 4,
            TokenKind::DrawElementsInstanced => 5,
            TokenKind::DrawArraysInstanced => 6,
        };
        (kind_bits << 20) | kind.record_size() as u32
    }

    /// Inverse of this driver's header encoding.
    pub fn decode_header(header: u32) -> Option<(TokenKind, usize)> {
        let kind = match header >> 20 {
            1 => TokenKind::UniformAddress,
            2 => TokenKind::AttributeAddress,
            3 => TokenKind::ElementAddress,
            4 => TokenKind::LineWidth,
            5 => TokenKind::DrawElementsInstanced,
            6 => TokenKind::DrawArraysInstanced,
            _ => return None,
        };
        Some((kind, (header & 0xf_ffff) as usize))
    }

    /// Decodes a contiguous run of records as this driver encodes them.
    pub fn decode_stream(bytes: &[u8]) -> Vec<DecodedToken> {
        let mut decoded = Vec::new();
        let mut cursor = 0;
        while cursor + 4 <= bytes.len() {
            let header = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
            let Some((kind, size)) = Self::decode_header(header) else {
                break;
            };
            if cursor + size > bytes.len() {
                break;
            }
            let record = &bytes[cursor..cursor + size];
            decoded.push(match kind {
                TokenKind::UniformAddress => {
                    DecodedToken::UniformAddress(bytemuck::pod_read_unaligned(record))
                }
                TokenKind::AttributeAddress => {
                    DecodedToken::AttributeAddress(bytemuck::pod_read_unaligned(record))
                }
                TokenKind::ElementAddress => {
                    DecodedToken::ElementAddress(bytemuck::pod_read_unaligned(record))
                }
                TokenKind::LineWidth => {
                    DecodedToken::LineWidth(bytemuck::pod_read_unaligned(record))
                }
                TokenKind::DrawElementsInstanced => {
                    DecodedToken::DrawElementsInstanced(bytemuck::pod_read_unaligned(record))
                }
                TokenKind::DrawArraysInstanced => {
                    DecodedToken::DrawArraysInstanced(bytemuck::pod_read_unaligned(record))
                }
            });
            cursor += size;
        }
        decoded
    }
}

impl Driver for RecordingDriver {
    fn is_extension_supported(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    fn limits(&self) -> DriverLimits {
        self.limits
    }

    fn create_buffer(&mut self) -> BufferId {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, BufferRecord::default());
        id
    }

    fn allocate_buffer(&mut self, buffer: BufferId, size: u64) {
        let record = self
            .buffers
            .get_mut(&buffer)
            .expect("allocate_buffer on unknown buffer");
        record.size = size;
        record.data = vec![0; size as usize];
        record.generation += 1;
        record.address = None;
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) {
        let record = self
            .buffers
            .get_mut(&buffer)
            .expect("write_buffer on unknown buffer");
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= record.data.len(),
            "write_buffer out of bounds: {end} > {}",
            record.data.len()
        );
        record.data[start..end].copy_from_slice(data);
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(record) = self.buffers.get_mut(&buffer) {
            record.deleted = true;
        }
    }

    fn make_buffer_resident(&mut self, buffer: BufferId) -> GpuAddress {
        let record = self
            .buffers
            .get_mut(&buffer)
            .expect("make_buffer_resident on unknown buffer");
        if record.address.is_none() {
            record.address = Some(GpuAddress(
                ADDRESS_SPACE_BASE
                    + u64::from(buffer.0) * ADDRESS_STRIDE_PER_BUFFER
                    + u64::from(record.generation) * ADDRESS_STRIDE_PER_GENERATION,
            ));
        }
        record.address.unwrap()
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.applied_program = program;
    }

    fn set_line_stipple(&mut self, stipple: Option<StippleParams>) {
        self.applied_stipple = stipple;
    }

    fn configure_vertex_attribs(&mut self, mask: AttribMask) {
        self.applied_attribs = mask;
    }

    fn capture_state(&mut self, topology: TopologyClass) -> StateHandle {
        let handle = StateHandle(self.next_state);
        self.next_state += 1;
        self.states.insert(
            handle,
            CapturedState {
                program: self.applied_program,
                stipple: self.applied_stipple,
                attrib_mask: self.applied_attribs,
                topology,
            },
        );
        handle
    }

    fn delete_states(&mut self, states: &[StateHandle]) {
        for &state in states {
            self.deleted_states.insert(state);
        }
        self.deleted_state_batches += 1;
    }

    fn token_header(&self, kind: TokenKind) -> u32 {
        Self::header_for(kind)
    }

    fn stage_index(&self, stage: ShaderStage) -> u16 {
        match stage {
            ShaderStage::Vertex => 0,
            ShaderStage::Fragment => 1,
        }
    }

    fn draw_token_segments(&mut self, stream: BufferId, segments: TokenSegments<'_>) {
        assert_eq!(segments.offsets.len(), segments.sizes.len());
        assert_eq!(segments.offsets.len(), segments.states.len());
        assert_eq!(segments.offsets.len(), segments.fbos.len());
        self.draws.push(RecordedDraw {
            stream,
            offsets: segments.offsets.to_vec(),
            sizes: segments.sizes.to_vec(),
            states: segments.states.to_vec(),
            fbos: segments.fbos.to_vec(),
        });
    }

    fn create_command_list(&mut self) -> CommandListHandle {
        let list = CommandListHandle(self.next_command_list);
        self.next_command_list += 1;
        self.command_lists.insert(list, CommandListRecord::default());
        list
    }

    fn list_token_segments(
        &mut self,
        list: CommandListHandle,
        stream: &[u8],
        segments: TokenSegments<'_>,
    ) {
        let record = self
            .command_lists
            .get_mut(&list)
            .expect("list_token_segments on unknown command list");
        record.segment_count = segments.len();
        record.stream_len = stream.len();
    }

    fn compile_command_list(&mut self, list: CommandListHandle) {
        if let Some(record) = self.command_lists.get_mut(&list) {
            record.compiled = true;
        }
    }

    fn call_command_list(&mut self, list: CommandListHandle) {
        if let Some(record) = self.command_lists.get_mut(&list) {
            record.calls += 1;
        }
    }

    fn delete_command_list(&mut self, list: CommandListHandle) {
        if let Some(record) = self.command_lists.get_mut(&list) {
            record.deleted = true;
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferHandle {
        let fbo = FramebufferHandle(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers
            .insert(fbo, FramebufferRecord { attachments: None });
        fbo
    }

    fn delete_framebuffer(&mut self, fbo: FramebufferHandle) {
        self.framebuffers.remove(&fbo);
    }

    fn bound_draw_framebuffer(&self) -> FramebufferHandle {
        self.bound_framebuffer
    }

    fn bind_framebuffer(&mut self, fbo: FramebufferHandle) {
        self.bound_framebuffer = fbo;
    }

    fn create_multisampled_texture(
        &mut self,
        kind: AttachmentKind,
        width: u32,
        height: u32,
        samples: u32,
    ) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let handle = TextureGpuHandle(0xbeef_0000_0000 + u64::from(id.0));
        self.textures.insert(
            id,
            TextureRecord {
                kind,
                width,
                height,
                samples,
                handle,
                deleted: false,
            },
        );
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(record) = self.textures.get_mut(&texture) {
            if self.resident_texture_handles.contains(&record.handle) {
                self.deleted_while_resident.push(texture);
            }
            record.deleted = true;
        }
    }

    fn texture_gpu_handle(&mut self, texture: TextureId) -> TextureGpuHandle {
        self.textures
            .get(&texture)
            .expect("texture_gpu_handle on unknown texture")
            .handle
    }

    fn make_texture_handle_resident(&mut self, handle: TextureGpuHandle) {
        self.resident_texture_handles.insert(handle);
    }

    fn make_texture_handle_non_resident(&mut self, handle: TextureGpuHandle) {
        self.resident_texture_handles.remove(&handle);
    }

    fn attach_framebuffer_targets(
        &mut self,
        fbo: FramebufferHandle,
        color: TextureId,
        depth_stencil: TextureId,
    ) -> FramebufferStatus {
        let record = self
            .framebuffers
            .get_mut(&fbo)
            .expect("attach_framebuffer_targets on unknown framebuffer");
        record.attachments = Some((color, depth_stencil));
        FramebufferStatus::Complete
    }

    fn current_sample_count(&self) -> u32 {
        self.sample_count
    }

    fn blit_framebuffer(
        &mut self,
        src: FramebufferHandle,
        dst: FramebufferHandle,
        width: u32,
        height: u32,
    ) {
        self.blits.push(RecordedBlit {
            src,
            dst,
            width,
            height,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reallocation_moves_the_buffer_address() {
        let mut driver = RecordingDriver::new();
        let buffer = driver.create_buffer();

        driver.allocate_buffer(buffer, 256);
        let first = driver.make_buffer_resident(buffer);
        // Address is memoized while the allocation is stable.
        assert_eq!(driver.make_buffer_resident(buffer), first);

        driver.allocate_buffer(buffer, 512);
        let second = driver.make_buffer_resident(buffer);
        assert_ne!(first, second);
    }

    #[test]
    fn header_round_trips_through_decode() {
        for kind in TokenKind::ALL {
            let header = RecordingDriver::header_for(kind);
            assert_eq!(
                RecordingDriver::decode_header(header),
                Some((kind, kind.record_size()))
            );
        }
    }

    #[test]
    fn missing_extension_is_reported() {
        let driver = RecordingDriver::without_extension(crate::driver::EXT_COMMAND_LIST);
        assert!(!driver.is_extension_supported(crate::driver::EXT_COMMAND_LIST));
        assert!(driver.is_extension_supported(crate::driver::EXT_BINDLESS_TEXTURE));
    }
}
