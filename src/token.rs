//! Binary command-token records and the stream writer.
//!
//! Records are the driver's wire format: packed little-endian structs with
//! a 32-bit header encoding the record kind and byte size. The header
//! value itself is driver-defined and obtained through
//! [`crate::driver::Driver::token_header`]; everything after it is laid out
//! here, byte-for-byte.

use bytemuck::{Pod, Zeroable};

/// Command-token record kinds emitted by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    UniformAddress,
    AttributeAddress,
    ElementAddress,
    LineWidth,
    DrawElementsInstanced,
    DrawArraysInstanced,
}

impl TokenKind {
    /// Total record size in bytes, header included.
    pub fn record_size(self) -> usize {
        match self {
            TokenKind::UniformAddress => core::mem::size_of::<UniformAddressToken>(),
            TokenKind::AttributeAddress => core::mem::size_of::<AttributeAddressToken>(),
            TokenKind::ElementAddress => core::mem::size_of::<ElementAddressToken>(),
            TokenKind::LineWidth => core::mem::size_of::<LineWidthToken>(),
            TokenKind::DrawElementsInstanced => {
                core::mem::size_of::<DrawElementsInstancedToken>()
            }
            TokenKind::DrawArraysInstanced => core::mem::size_of::<DrawArraysInstancedToken>(),
        }
    }

    pub const ALL: [TokenKind; 6] = [
        TokenKind::UniformAddress,
        TokenKind::AttributeAddress,
        TokenKind::ElementAddress,
        TokenKind::LineWidth,
        TokenKind::DrawElementsInstanced,
        TokenKind::DrawArraysInstanced,
    ];
}

/// Binds a uniform-buffer range by GPU address to `slot` for one stage.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UniformAddressToken {
    pub header: u32,
    pub slot: u16,
    pub stage: u16,
    pub address: u64,
}

/// Binds a vertex buffer by GPU address to an attribute binding index.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct AttributeAddressToken {
    pub header: u32,
    pub index: u32,
    pub address: u64,
}

/// Binds an index buffer by GPU address.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ElementAddressToken {
    pub header: u32,
    pub address: u64,
    pub index_byte_size: u32,
}

/// Sets the rasterizer line width for subsequent draws in the run.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LineWidthToken {
    pub header: u32,
    pub width: f32,
}

/// Indexed instanced draw. `mode` carries the raw primitive topology
/// encoding understood by the driver.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawElementsInstancedToken {
    pub header: u32,
    pub mode: u32,
    pub count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: u32,
    pub base_instance: u32,
}

/// Non-indexed instanced draw.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DrawArraysInstancedToken {
    pub header: u32,
    pub mode: u32,
    pub count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_instance: u32,
}

/// Appends packed records into one contiguous byte buffer, tracking the
/// current object's run so the compiler can record `(offset, size)` pairs.
///
/// Runs are packed back to back: the offset of run `i + 1` equals
/// `offset[i] + size[i]` by construction.
#[derive(Debug, Default)]
pub struct TokenWriter {
    bytes: Vec<u8>,
    run_start: usize,
}

impl TokenWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.run_start = 0;
    }

    /// Starts a new record run at the current end of the buffer.
    pub fn begin_run(&mut self) {
        self.run_start = self.bytes.len();
    }

    /// Ends the current run, returning its byte offset and length.
    pub fn end_run(&mut self) -> (u64, u32) {
        let offset = self.run_start as u64;
        let size = (self.bytes.len() - self.run_start) as u32;
        (offset, size)
    }

    pub fn push<T: Pod>(&mut self, record: T) {
        self.bytes.extend_from_slice(bytemuck::bytes_of(&record));
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
