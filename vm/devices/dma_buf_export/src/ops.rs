// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The exporter's capability table and presence-based dispatch.

use crate::error::DmaBufError;
use crate::sg_table::ScatterGatherTable;

/// A kernel virtual address returned by an exporter's vmap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KernelVa(pub u64);

/// A process address range to be populated by an exporter's mmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmArea {
    /// First address of the range.
    pub start: u64,
    /// One past the last address of the range.
    pub end: u64,
    /// Offset into the buffer, in pages.
    pub pgoff: u64,
    /// Driver-defined mapping flags, updated by the exporter.
    pub flags: u64,
}

impl VmArea {
    /// The length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// The operations an exporting driver supplies for its memory objects of type
/// `T`.
///
/// Every entry is independently optional. The table is normally a `static`
/// owned by the driver.
pub struct ExporterOps<T> {
    /// Keeps the object's backing pages resident while it is attached.
    pub pin: Option<fn(&T) -> Result<(), DmaBufError>>,
    /// Releases a [`pin`](Self::pin).
    pub unpin: Option<fn(&T)>,
    /// Builds a scatter-gather table of the object's pages. Required for any
    /// DMA mapping.
    pub get_sg_table: Option<fn(&T) -> Result<ScatterGatherTable, DmaBufError>>,
    /// Maps the object into a process address range.
    pub mmap: Option<fn(&T, &mut VmArea) -> Result<(), DmaBufError>>,
    /// Maps the whole object into kernel virtual address space.
    pub vmap: Option<fn(&T) -> Option<KernelVa>>,
    /// Releases a [`vmap`](Self::vmap) mapping.
    pub vunmap: Option<fn(&T, KernelVa)>,
}

impl<T> ExporterOps<T> {
    /// A table with no capabilities.
    pub const EMPTY: Self = Self {
        pin: None,
        unpin: None,
        get_sg_table: None,
        mmap: None,
        vmap: None,
        vunmap: None,
    };
}

impl<T> std::fmt::Debug for ExporterOps<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterOps")
            .field("pin", &self.pin.is_some())
            .field("unpin", &self.unpin.is_some())
            .field("get_sg_table", &self.get_sg_table.is_some())
            .field("mmap", &self.mmap.is_some())
            .field("vmap", &self.vmap.is_some())
            .field("vunmap", &self.vunmap.is_some())
            .finish()
    }
}

/// Whether a pin request reached the exporter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum PinOutcome {
    Pinned,
    Skipped,
}

impl<T> ExporterOps<T> {
    pub(crate) fn pin(&self, obj: &T) -> Result<PinOutcome, DmaBufError> {
        match self.pin {
            Some(pin) => pin(obj).map(|()| PinOutcome::Pinned),
            None => Ok(PinOutcome::Skipped),
        }
    }

    /// Returns true if the exporter's unpin was called.
    pub(crate) fn unpin(&self, obj: &T) -> bool {
        match self.unpin {
            Some(unpin) => {
                unpin(obj);
                true
            }
            None => false,
        }
    }

    pub(crate) fn sg_table(&self, obj: &T) -> Result<ScatterGatherTable, DmaBufError> {
        let get_sg_table = self.get_sg_table.ok_or(DmaBufError::NotSupported)?;
        get_sg_table(obj)
    }

    pub(crate) fn mmap(&self, obj: &T, vma: &mut VmArea) -> Result<(), DmaBufError> {
        let mmap = self.mmap.ok_or(DmaBufError::NotSupported)?;
        mmap(obj, vma)
    }

    pub(crate) fn vmap(&self, obj: &T) -> Option<KernelVa> {
        self.vmap.and_then(|vmap| vmap(obj))
    }

    pub(crate) fn vunmap(&self, obj: &T, va: KernelVa) {
        if let Some(vunmap) = self.vunmap {
            vunmap(obj, va);
        }
    }
}
