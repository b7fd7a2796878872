// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-attachment cache of the single DMA mapping an importer may hold.

use crate::device::DmaDevice;
use crate::device::MapSgError;
use crate::error::DmaBufError;
use crate::sg_table::DmaAttrs;
use crate::sg_table::DmaDirection;
use crate::sg_table::ScatterGatherTable;
use std::sync::Arc;

#[derive(Debug, Default)]
enum MappingState {
    #[default]
    Unmapped,
    Mapped {
        direction: DmaDirection,
        table: Arc<ScatterGatherTable>,
    },
}

/// Holds at most one mapped table, in one direction.
#[derive(Debug, Default)]
pub(crate) struct MappingCache {
    state: MappingState,
}

impl MappingCache {
    pub fn direction(&self) -> DmaDirection {
        match &self.state {
            MappingState::Unmapped => DmaDirection::None,
            MappingState::Mapped { direction, .. } => *direction,
        }
    }

    pub fn table(&self) -> Option<&Arc<ScatterGatherTable>> {
        match &self.state {
            MappingState::Unmapped => None,
            MappingState::Mapped { table, .. } => Some(table),
        }
    }

    /// Returns the cached table for `direction`, or builds one with
    /// `get_table`, maps it through `device`, and caches it.
    pub fn map(
        &mut self,
        device: &dyn DmaDevice,
        direction: DmaDirection,
        attrs: DmaAttrs,
        get_table: impl FnOnce() -> Result<ScatterGatherTable, DmaBufError>,
    ) -> Result<Arc<ScatterGatherTable>, DmaBufError> {
        if direction == DmaDirection::None {
            return Err(DmaBufError::InvalidArgument);
        }

        match &self.state {
            MappingState::Mapped {
                direction: current,
                table,
            } => {
                if *current == direction {
                    return Ok(table.clone());
                }
                return Err(DmaBufError::ConflictingDirection {
                    current: *current,
                    requested: direction,
                });
            }
            MappingState::Unmapped => {}
        }

        let mut table = get_table()?;
        // On failure the table is dropped here, before anything is cached.
        device
            .map_sg(&mut table, direction, attrs)
            .map_err(|err| match err {
                MapSgError::Failed => DmaBufError::DmaMappingFailure,
                MapSgError::Interrupted => DmaBufError::Interrupted,
            })?;

        let table = Arc::new(table);
        self.state = MappingState::Mapped {
            direction,
            table: table.clone(),
        };
        Ok(table)
    }

    /// Unmaps and frees the cached table, if any. Returns the number of
    /// outstanding references the importer still held to the table.
    pub fn release(&mut self, device: &dyn DmaDevice, attrs: DmaAttrs) -> Option<usize> {
        match std::mem::take(&mut self.state) {
            MappingState::Unmapped => None,
            MappingState::Mapped { direction, table } => {
                device.unmap_sg(&table, direction, attrs);
                Some(Arc::strong_count(&table) - 1)
            }
        }
    }
}
