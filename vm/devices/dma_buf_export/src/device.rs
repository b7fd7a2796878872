// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::sg_table::DmaAttrs;
use crate::sg_table::DmaDirection;
use crate::sg_table::ScatterGatherTable;
use thiserror::Error;

/// Failure from [`DmaDevice::map_sg`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum MapSgError {
    /// No mapping could be established.
    #[error("dma mapping failed")]
    Failed,
    /// Mapping was interrupted by a signal; the caller may retry.
    #[error("dma mapping interrupted")]
    Interrupted,
}

/// The platform DMA layer, scoped to one importing device.
pub trait DmaDevice: Send + Sync {
    /// Returns a device ID, used to identify the importer.
    fn id(&self) -> &str;

    /// Maps every segment of `table` for access by this device, filling in
    /// the bus addresses.
    fn map_sg(
        &self,
        table: &mut ScatterGatherTable,
        direction: DmaDirection,
        attrs: DmaAttrs,
    ) -> Result<(), MapSgError>;

    /// Tears down a mapping established by [`DmaDevice::map_sg`] with the same
    /// direction and attributes.
    fn unmap_sg(&self, table: &ScatterGatherTable, direction: DmaDirection, attrs: DmaAttrs);
}
