// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anyhow::ensure;

use crate::compartment::{Compartment, Stored};
use crate::module::{WASM32_MAX_PAGES, WASM_PAGE_SIZE};
use crate::trap::{CallStack, Exception, Trap};
use crate::types::MemoryType;

/// A WebAssembly linear memory.
///
/// The handle is a small `Copy` value; the backing storage lives in the
/// owning compartment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Memory(pub(crate) Stored<MemoryData>);

#[derive(Debug)]
pub(crate) struct MemoryData {
    ty: MemoryType,
    bytes: Vec<u8>,
}

// ===== impl MemoryData =====

impl MemoryData {
    pub(crate) fn new(ty: MemoryType) -> crate::Result<Self> {
        ensure!(
            ty.size.min <= ty.size.max,
            "invalid memory type `{ty}`: min exceeds max"
        );
        ensure!(
            ty.size.min <= WASM32_MAX_PAGES,
            "invalid memory type `{ty}`: min exceeds the 32-bit address space"
        );
        ensure!(
            !ty.shared || ty.size.is_bounded(),
            "invalid memory type `{ty}`: shared memories must have a bounded max"
        );

        let len = usize::try_from(ty.size.min * WASM_PAGE_SIZE)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| anyhow::anyhow!("out of memory allocating {len} byte memory"))?;
        bytes.resize(len, 0);

        Ok(Self { ty, bytes })
    }

    pub(crate) fn ty(&self) -> MemoryType {
        self.ty
    }

    /// The current size in pages. Always within the type's constraints.
    pub(crate) fn size(&self) -> u64 {
        self.bytes.len() as u64 / WASM_PAGE_SIZE
    }

    /// Grows the memory by `delta` pages, returning the previous size in
    /// pages, or `None` if growth would exceed the type's maximum or the
    /// 32-bit address space, or if the allocation fails. Shrinking is not
    /// possible; `delta` is unsigned.
    pub(crate) fn grow(&mut self, delta: u64) -> Option<u64> {
        let old_pages = self.size();
        let new_pages = old_pages.checked_add(delta)?;
        if new_pages > self.ty.size.max || new_pages > WASM32_MAX_PAGES {
            return None;
        }

        let new_len = usize::try_from(new_pages * WASM_PAGE_SIZE).ok()?;
        self.bytes
            .try_reserve_exact(new_len - self.bytes.len())
            .ok()?;
        self.bytes.resize(new_len, 0);
        Some(old_pages)
    }

    /// A bounds-checked view of `len` bytes at `addr`.
    pub(crate) fn slice(&self, addr: u64, len: usize) -> Result<&[u8], Trap> {
        let start = usize::try_from(addr).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        self.bytes.get(start..end).ok_or(Trap::MemoryOutOfBounds)
    }

    pub(crate) fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], Trap> {
        let start = usize::try_from(addr).map_err(|_| Trap::MemoryOutOfBounds)?;
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        self.bytes
            .get_mut(start..end)
            .ok_or(Trap::MemoryOutOfBounds)
    }
}

// ===== impl Memory =====

impl Memory {
    /// The memory's type.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not denote a live memory of `compartment`.
    pub fn ty(&self, compartment: &Compartment) -> MemoryType {
        compartment
            .lock()
            .memories
            .get(self.0)
            .expect("memory is not a live object of this compartment")
            .ty()
    }

    /// The current size in units of 64 KiB pages.
    pub fn size(&self, compartment: &Compartment) -> u64 {
        compartment
            .lock()
            .memories
            .get(self.0)
            .expect("memory is not a live object of this compartment")
            .size()
    }

    /// Grows the memory by `delta` pages, returning the previous size.
    ///
    /// Growth is atomic: of two racing grows, one observes the size the
    /// other produced.
    pub fn grow(&self, compartment: &Compartment, delta: u64) -> crate::Result<u64> {
        let mut inner = compartment.lock();
        let data = inner
            .memories
            .get_mut(self.0)
            .ok_or_else(|| anyhow::anyhow!("memory is not a live object of this compartment"))?;
        data.grow(delta).ok_or_else(|| {
            anyhow::anyhow!("memory growth by {delta} pages exceeds limit `{}`", data.ty())
        })
    }

    /// Copies bytes out of the memory, trapping on overflow.
    pub fn read(
        &self,
        compartment: &Compartment,
        offset: u64,
        buffer: &mut [u8],
    ) -> crate::Result<()> {
        let inner = compartment.lock();
        let data = inner
            .memories
            .get(self.0)
            .ok_or_else(|| anyhow::anyhow!("memory is not a live object of this compartment"))?;
        match data.slice(offset, buffer.len()) {
            Ok(slice) => {
                buffer.copy_from_slice(slice);
                Ok(())
            }
            Err(trap) => Err(Exception::from_trap(trap, CallStack::default()).into_error()),
        }
    }

    /// Copies bytes into the memory, trapping on overflow. A trapped write
    /// mutates nothing and leaves the memory live.
    pub fn write(
        &self,
        compartment: &Compartment,
        offset: u64,
        buffer: &[u8],
    ) -> crate::Result<()> {
        let mut inner = compartment.lock();
        let data = inner
            .memories
            .get_mut(self.0)
            .ok_or_else(|| anyhow::anyhow!("memory is not a live object of this compartment"))?;
        match data.slice_mut(offset, buffer.len()) {
            Ok(slice) => {
                slice.copy_from_slice(buffer);
                Ok(())
            }
            Err(trap) => Err(Exception::from_trap(trap, CallStack::default()).into_error()),
        }
    }

    pub(crate) fn comes_from(&self, compartment: &Compartment) -> bool {
        compartment.lock().memories.contains(self.0)
    }
}
