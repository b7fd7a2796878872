// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Importer attachments: the attach/map/detach lifecycle.

use crate::buffer::BufferInner;
use crate::buffer::UnpinPolicy;
use crate::device::DmaDevice;
use crate::error::DmaBufError;
use crate::mapping::MappingCache;
use crate::ops::PinOutcome;
use crate::sg_table::DmaDirection;
use crate::sg_table::ScatterGatherTable;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identifies an attachment within its buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentId(pub(crate) u64);

/// One importing device's binding to an
/// [`ExportedBuffer`](crate::ExportedBuffer).
///
/// Dropping the attachment detaches it: any cached DMA mapping is torn down,
/// the exporter's unpin is called, and the buffer forgets the device.
pub struct Attachment<T: 'static> {
    buffer: Arc<BufferInner<T>>,
    device: Arc<dyn DmaDevice>,
    id: AttachmentId,
    pinned: bool,
    cache: MappingCache,
}

/// A failed [`ExportedBuffer::attach`](crate::ExportedBuffer::attach).
///
/// If the failure came from the exporter's pin, the attachment had already
/// been allocated and is carried here. It is detached, including the call to
/// the exporter's unpin, when this error is dropped.
#[derive(Error)]
#[error("failed to attach device {device}")]
pub struct AttachFailed<T: 'static> {
    device: String,
    #[source]
    error: DmaBufError,
    attachment: Option<Attachment<T>>,
}

impl<T: 'static> fmt::Debug for AttachFailed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachFailed")
            .field("device", &self.device)
            .field("error", &self.error)
            .field("attachment", &self.attachment)
            .finish()
    }
}

impl<T: 'static> AttachFailed<T> {
    /// The underlying error.
    pub fn error(&self) -> &DmaBufError {
        &self.error
    }

    /// Splits the failure into the error and the partially attached state,
    /// which the caller must detach.
    pub fn into_parts(self) -> (DmaBufError, Option<Attachment<T>>) {
        (self.error, self.attachment)
    }
}

impl<T: 'static> fmt::Debug for Attachment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("buffer", &self.buffer.config.name)
            .field("device", &self.device.id())
            .field("id", &self.id)
            .field("pinned", &self.pinned)
            .field("direction", &self.cache.direction())
            .finish()
    }
}

impl<T: 'static> Attachment<T> {
    pub(crate) fn attach(
        buffer: &Arc<BufferInner<T>>,
        device: Arc<dyn DmaDevice>,
    ) -> Result<Self, AttachFailed<T>> {
        let id = match buffer.register(device.id()) {
            Ok(id) => id,
            Err(error) => {
                tracing::debug!(
                    buffer = buffer.config.name.as_str(),
                    device = device.id(),
                    error = &error as &dyn std::error::Error,
                    "attach rejected"
                );
                return Err(AttachFailed {
                    device: device.id().to_owned(),
                    error,
                    attachment: None,
                });
            }
        };

        let mut attachment = Attachment {
            buffer: buffer.clone(),
            device,
            id,
            pinned: false,
            cache: MappingCache::default(),
        };

        match buffer.ops.pin(&buffer.object) {
            Ok(PinOutcome::Pinned) => attachment.pinned = true,
            Ok(PinOutcome::Skipped) => {}
            Err(error) => {
                tracing::warn!(
                    buffer = buffer.config.name.as_str(),
                    device = attachment.device.id(),
                    attachment = id.0,
                    error = &error as &dyn std::error::Error,
                    "pin failed"
                );
                return Err(AttachFailed {
                    device: attachment.device.id().to_owned(),
                    error,
                    attachment: Some(attachment),
                });
            }
        }

        tracing::debug!(
            buffer = buffer.config.name.as_str(),
            device = attachment.device.id(),
            attachment = id.0,
            pinned = attachment.pinned,
            "attached"
        );
        Ok(attachment)
    }

    /// The attachment's ID.
    pub fn id(&self) -> AttachmentId {
        self.id
    }

    /// The importing device.
    pub fn device(&self) -> &Arc<dyn DmaDevice> {
        &self.device
    }

    /// Returns true if the exporter's pin was called and succeeded.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// The direction of the cached mapping, or [`DmaDirection::None`].
    pub fn direction(&self) -> DmaDirection {
        self.cache.direction()
    }

    /// The cached mapped table, if any.
    pub fn mapped_table(&self) -> Option<&Arc<ScatterGatherTable>> {
        self.cache.table()
    }

    /// Maps the buffer for DMA by the attached device.
    ///
    /// The mapping is cached: repeated calls with the same direction return
    /// the same table without touching the DMA layer, and a request for a
    /// different direction fails with [`DmaBufError::ConflictingDirection`]
    /// until the attachment is detached. [`DmaBufError::Interrupted`] leaves
    /// the attachment unmapped, and the call may be retried.
    ///
    /// The returned table is only valid while the attachment is alive. Detach
    /// unmaps it from the device even if a reference is still held; the
    /// `dma_address` values in such a table are stale and must not be
    /// programmed into the device.
    pub fn map_for_device(
        &mut self,
        direction: DmaDirection,
    ) -> Result<Arc<ScatterGatherTable>, DmaBufError> {
        let buffer = &self.buffer;
        let was_mapped = self.cache.direction() != DmaDirection::None;
        let result = self.cache.map(
            self.device.as_ref(),
            direction,
            buffer.config.dma_attrs(),
            || buffer.ops.sg_table(&buffer.object),
        );

        match &result {
            Ok(table) if !was_mapped => {
                tracing::debug!(
                    buffer = buffer.config.name.as_str(),
                    device = self.device.id(),
                    attachment = self.id.0,
                    ?direction,
                    entries = table.len(),
                    "mapped for device"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    buffer = buffer.config.name.as_str(),
                    device = self.device.id(),
                    attachment = self.id.0,
                    ?direction,
                    error = err as &dyn std::error::Error,
                    "map for device failed"
                );
            }
        }
        result
    }

    /// Releases the importer's use of a table returned by
    /// [`map_for_device`](Self::map_for_device).
    ///
    /// The DMA mapping stays cached; it is only torn down on detach.
    pub fn unmap_for_device(&self, table: &ScatterGatherTable, direction: DmaDirection) {
        tracing::trace!(
            buffer = self.buffer.config.name.as_str(),
            device = self.device.id(),
            attachment = self.id.0,
            ?direction,
            cached = self
                .cache
                .table()
                .is_some_and(|cached| std::ptr::eq(cached.as_ref(), table)),
            "unmap deferred to detach"
        );
    }

    /// Detaches from the buffer. Equivalent to dropping the attachment.
    pub fn detach(self) {
        drop(self);
    }
}

impl<T: 'static> Drop for Attachment<T> {
    fn drop(&mut self) {
        let buffer = &self.buffer;
        let name = buffer.config.name.as_str();

        if let Some(outstanding) = self
            .cache
            .release(self.device.as_ref(), buffer.config.dma_attrs())
        {
            if outstanding > 0 {
                tracing::warn!(
                    buffer = name,
                    device = self.device.id(),
                    attachment = self.id.0,
                    outstanding,
                    "table still referenced after detach"
                );
            }
        }

        buffer.unregister(self.device.id(), self.id);

        let unpinned = match buffer.config.unpin_policy {
            UnpinPolicy::Always => buffer.ops.unpin(&buffer.object),
            UnpinPolicy::OnlyIfPinned => self.pinned && buffer.ops.unpin(&buffer.object),
        };
        if unpinned && !self.pinned {
            tracing::warn!(
                buffer = name,
                device = self.device.id(),
                attachment = self.id.0,
                "unpin without a matching pin"
            );
        }

        tracing::debug!(
            buffer = name,
            device = self.device.id(),
            attachment = self.id.0,
            unpinned,
            "detached"
        );
    }
}
