//! GPU buffer lifecycle with explicit residency tracking.
//!
//! A buffer's virtual address may only be fetched once its allocation is
//! stable, and a growth reallocation invalidates any previously fetched
//! address. The state machine makes that ordering explicit: transitions
//! only move forward, except that growth resets `Resident` back to
//! `Allocated`.

use crate::driver::{BufferId, Driver, GpuAddress};

/// Rounds `value` up to the next multiple of `alignment`.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Residency of one GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferResidency {
    Unallocated,
    /// Storage exists; no address has been fetched for it.
    Allocated { size: u64 },
    /// Storage exists and is GPU-resident at a stable address.
    Resident { size: u64, address: GpuAddress },
}

/// A driver buffer plus its residency state.
#[derive(Debug)]
pub struct GpuBuffer {
    id: BufferId,
    residency: BufferResidency,
}

impl GpuBuffer {
    pub fn new(driver: &mut dyn Driver) -> Self {
        Self {
            id: driver.create_buffer(),
            residency: BufferResidency::Unallocated,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn residency(&self) -> BufferResidency {
        self.residency
    }

    pub fn size(&self) -> u64 {
        match self.residency {
            BufferResidency::Unallocated => 0,
            BufferResidency::Allocated { size } | BufferResidency::Resident { size, .. } => size,
        }
    }

    /// Address if one has been fetched for the current allocation.
    pub fn address(&self) -> Option<GpuAddress> {
        match self.residency {
            BufferResidency::Resident { address, .. } => Some(address),
            _ => None,
        }
    }

    /// Grows the allocation to at least `required` bytes. Growing discards
    /// contents and drops any previously fetched address. Returns whether
    /// a reallocation happened.
    pub fn ensure_capacity(&mut self, driver: &mut dyn Driver, required: u64) -> bool {
        if self.size() >= required && !matches!(self.residency, BufferResidency::Unallocated) {
            return false;
        }
        driver.allocate_buffer(self.id, required);
        self.residency = BufferResidency::Allocated { size: required };
        true
    }

    /// The buffer's GPU virtual address, fetching it (and making the
    /// buffer resident) on first use after an allocation.
    ///
    /// The buffer must have been allocated via [`GpuBuffer::ensure_capacity`]
    /// or [`GpuBuffer::upload`] first.
    pub fn resident_address(&mut self, driver: &mut dyn Driver) -> GpuAddress {
        match self.residency {
            BufferResidency::Resident { address, .. } => address,
            BufferResidency::Allocated { size } => {
                let address = driver.make_buffer_resident(self.id);
                self.residency = BufferResidency::Resident { size, address };
                address
            }
            BufferResidency::Unallocated => {
                unreachable!("resident_address on an unallocated buffer")
            }
        }
    }

    pub fn write(&mut self, driver: &mut dyn Driver, offset: u64, bytes: &[u8]) {
        driver.write_buffer(self.id, offset, bytes);
    }

    /// Replaces the buffer contents, reallocating only when the data has
    /// outgrown the current storage and updating in place otherwise.
    pub fn upload(&mut self, driver: &mut dyn Driver, bytes: &[u8]) {
        self.ensure_capacity(driver, bytes.len() as u64);
        if !bytes.is_empty() {
            driver.write_buffer(self.id, 0, bytes);
        }
    }

    pub fn delete(self, driver: &mut dyn Driver) {
        driver.delete_buffer(self.id);
    }
}
