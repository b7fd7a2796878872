// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The exported buffer and its pass-through CPU mapping operations.

use crate::attachment::AttachFailed;
use crate::attachment::Attachment;
use crate::attachment::AttachmentId;
use crate::device::DmaDevice;
use crate::error::DmaBufError;
use crate::ops::ExporterOps;
use crate::ops::KernelVa;
use crate::ops::VmArea;
use crate::sg_table::DmaAttrs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// When detach calls the exporter's unpin.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UnpinPolicy {
    /// Always unpin on detach, even if the pin at attach time failed or the
    /// exporter has no pin. The exporter's unpin must tolerate being called
    /// without a matching pin.
    #[default]
    Always,
    /// Only unpin if the pin at attach time succeeded.
    OnlyIfPinned,
}

/// Configuration for an [`ExportedBuffer`].
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Name used in diagnostics.
    pub name: String,
    /// Map and unmap with [`DmaAttrs::skip_cpu_sync`] set.
    pub skip_cpu_sync: bool,
    /// When detach calls the exporter's unpin.
    pub unpin_policy: UnpinPolicy,
    /// The maximum number of simultaneous attachments, if limited.
    pub max_attachments: Option<usize>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            name: "dma-buf".into(),
            skip_cpu_sync: true,
            unpin_policy: UnpinPolicy::Always,
            max_attachments: None,
        }
    }
}

impl ExportConfig {
    /// Sets the diagnostic name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets whether CPU cache maintenance is skipped on map and unmap.
    pub fn with_skip_cpu_sync(mut self, skip_cpu_sync: bool) -> Self {
        self.skip_cpu_sync = skip_cpu_sync;
        self
    }

    /// Sets the unpin policy.
    pub fn with_unpin_policy(mut self, policy: UnpinPolicy) -> Self {
        self.unpin_policy = policy;
        self
    }

    /// Limits the number of simultaneous attachments.
    pub fn with_max_attachments(mut self, max: usize) -> Self {
        self.max_attachments = Some(max);
        self
    }

    pub(crate) fn dma_attrs(&self) -> DmaAttrs {
        DmaAttrs {
            skip_cpu_sync: self.skip_cpu_sync,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    by_device: HashMap<String, AttachmentId>,
}

pub(crate) struct BufferInner<T: 'static> {
    pub object: T,
    pub ops: &'static ExporterOps<T>,
    pub config: ExportConfig,
    attachments: Mutex<Registry>,
}

impl<T: 'static> BufferInner<T> {
    pub fn register(&self, device_id: &str) -> Result<AttachmentId, DmaBufError> {
        let mut registry = self.attachments.lock();
        if registry.by_device.contains_key(device_id) {
            return Err(DmaBufError::AlreadyAttached {
                device: device_id.to_owned(),
            });
        }
        if let Some(max) = self.config.max_attachments {
            if registry.by_device.len() >= max {
                return Err(DmaBufError::AllocationFailure);
            }
        }
        registry
            .by_device
            .try_reserve(1)
            .map_err(|_| DmaBufError::AllocationFailure)?;

        let id = AttachmentId(registry.next_id);
        registry.next_id += 1;
        registry.by_device.insert(device_id.to_owned(), id);
        Ok(id)
    }

    pub fn unregister(&self, device_id: &str, id: AttachmentId) {
        let mut registry = self.attachments.lock();
        if registry.by_device.get(device_id) == Some(&id) {
            registry.by_device.remove(device_id);
        } else {
            tracing::warn!(
                buffer = self.config.name.as_str(),
                device = device_id,
                attachment = id.0,
                "detaching unregistered attachment"
            );
        }
    }
}

/// A memory object shared with other devices.
///
/// Cloning returns another handle to the same buffer. The object is dropped
/// once every handle and every [`Attachment`] is gone.
pub struct ExportedBuffer<T: 'static> {
    inner: Arc<BufferInner<T>>,
}

impl<T: 'static> Clone for ExportedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> std::fmt::Debug for ExportedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedBuffer")
            .field("name", &self.inner.config.name)
            .field("ops", self.inner.ops)
            .field("attachments", &self.attachment_count())
            .finish()
    }
}

impl<T: 'static> ExportedBuffer<T> {
    /// Exports `object`, whose capabilities are described by `ops`.
    pub fn new(object: T, ops: &'static ExporterOps<T>, config: ExportConfig) -> Self {
        tracing::debug!(buffer = config.name.as_str(), ?ops, "exporting buffer");
        Self {
            inner: Arc::new(BufferInner {
                object,
                ops,
                config,
                attachments: Mutex::new(Registry::default()),
            }),
        }
    }

    /// The exported object.
    pub fn object(&self) -> &T {
        &self.inner.object
    }

    /// The export configuration.
    pub fn config(&self) -> &ExportConfig {
        &self.inner.config
    }

    /// The diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The number of live attachments.
    pub fn attachment_count(&self) -> usize {
        self.inner.attachments.lock().by_device.len()
    }

    /// Returns true if `device_id` is attached.
    pub fn is_attached(&self, device_id: &str) -> bool {
        self.inner.attachments.lock().by_device.contains_key(device_id)
    }

    /// Attaches an importing device, pinning the object if the exporter
    /// supports it.
    ///
    /// If the pin fails, the returned error still owns the new attachment;
    /// see [`AttachFailed`].
    pub fn attach(&self, device: Arc<dyn DmaDevice>) -> Result<Attachment<T>, AttachFailed<T>> {
        Attachment::attach(&self.inner, device)
    }

    /// Maps the object into kernel virtual address space. Returns `None` if
    /// the exporter provides no such mapping.
    pub fn map_kernel(&self) -> Option<KernelVa> {
        self.inner.ops.vmap(&self.inner.object)
    }

    /// Releases a mapping returned by [`map_kernel`](Self::map_kernel).
    pub fn unmap_kernel(&self, va: KernelVa) {
        self.inner.ops.vunmap(&self.inner.object, va);
    }

    /// Maps the object into a process address range.
    pub fn map_into_process(&self, vma: &mut VmArea) -> Result<(), DmaBufError> {
        self.inner.ops.mmap(&self.inner.object, vma).inspect_err(|err| {
            tracing::debug!(
                buffer = self.name(),
                start = vma.start,
                len = vma.len(),
                error = err as &dyn std::error::Error,
                "mmap failed"
            );
        })
    }

    /// Maps a single page into kernel virtual address space.
    ///
    /// Exported GEM objects do not support per-page mappings, so this always
    /// returns `None`.
    pub fn map_page(&self, _page_num: u64) -> Option<KernelVa> {
        None
    }

    /// Releases a mapping returned by [`map_page`](Self::map_page).
    pub fn unmap_page(&self, _page_num: u64, _va: KernelVa) {}

    /// Maps a single page from a context that cannot sleep.
    ///
    /// Like [`map_page`](Self::map_page), this is not supported for exported
    /// GEM objects and always returns `None`.
    pub fn map_page_atomic(&self, _page_num: u64) -> Option<KernelVa> {
        None
    }

    /// Releases a mapping returned by
    /// [`map_page_atomic`](Self::map_page_atomic).
    pub fn unmap_page_atomic(&self, _page_num: u64, _va: KernelVa) {}
}
