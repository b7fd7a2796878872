// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Exporter-side helpers for sharing a driver's memory objects with other
//! devices through dma-buf style attachments.
//!
//! An exporting driver wraps its memory object in an [`ExportedBuffer`],
//! together with a static [`ExporterOps`] table describing which optional
//! capabilities it implements. Importers then [`attach`](ExportedBuffer::attach)
//! with their [`DmaDevice`] and map the buffer for DMA through the returned
//! [`Attachment`]. Each attachment caches at most one mapping, in one
//! direction, until it is detached.

#![forbid(unsafe_code)]

mod attachment;
mod buffer;
mod device;
mod error;
mod mapping;
mod ops;
mod sg_table;

#[cfg(test)]
mod test_helpers;

pub use attachment::AttachFailed;
pub use attachment::Attachment;
pub use attachment::AttachmentId;
pub use buffer::ExportConfig;
pub use buffer::ExportedBuffer;
pub use buffer::UnpinPolicy;
pub use device::DmaDevice;
pub use device::MapSgError;
pub use error::DmaBufError;
pub use ops::ExporterOps;
pub use ops::KernelVa;
pub use ops::VmArea;
pub use sg_table::DmaAttrs;
pub use sg_table::DmaDirection;
pub use sg_table::ScatterGatherTable;
pub use sg_table::SgEntry;
