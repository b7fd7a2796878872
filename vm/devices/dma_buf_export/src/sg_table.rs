// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scatter-gather tables and DMA mapping parameters.

use crate::error::DmaBufError;

/// The data flow direction of a DMA mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum DmaDirection {
    /// No mapping. Never valid as a mapping request.
    #[default]
    None,
    /// The device reads from memory.
    ToDevice,
    /// The device writes to memory.
    FromDevice,
    /// The device both reads and writes.
    Bidirectional,
}

/// Attributes passed to the DMA layer with each map and unmap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DmaAttrs {
    /// Skip CPU cache maintenance. The importer is responsible for
    /// synchronizing before it touches the memory.
    pub skip_cpu_sync: bool,
}

/// One physically contiguous segment of a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SgEntry {
    /// Physical address of the segment.
    pub phys_addr: u64,
    /// Length of the segment in bytes.
    pub length: u32,
    /// Bus address assigned by the DMA layer, once mapped.
    pub dma_address: Option<u64>,
    /// Length of the bus mapping, once mapped.
    pub dma_length: u32,
}

/// An ordered list of segments describing a buffer's pages for DMA.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScatterGatherTable {
    entries: Vec<SgEntry>,
}

impl ScatterGatherTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates an empty table with room for `count` entries, failing instead
    /// of aborting if the allocation cannot be satisfied.
    pub fn try_with_capacity(count: usize) -> Result<Self, DmaBufError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| DmaBufError::AllocationFailure)?;
        Ok(Self { entries })
    }

    /// Appends an unmapped segment.
    pub fn push(&mut self, phys_addr: u64, length: u32) {
        self.entries.push(SgEntry {
            phys_addr,
            length,
            dma_address: None,
            dma_length: 0,
        });
    }

    /// The number of segments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no segments.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The total byte length across all segments.
    pub fn total_length(&self) -> u64 {
        self.entries.iter().map(|e| e.length as u64).sum()
    }

    /// The segments.
    pub fn entries(&self) -> &[SgEntry] {
        &self.entries
    }

    /// The segments, for the DMA layer to fill in bus addresses.
    pub fn entries_mut(&mut self) -> &mut [SgEntry] {
        &mut self.entries
    }

    /// Returns true if every segment has a bus address.
    pub fn is_dma_mapped(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.dma_address.is_some())
    }
}
