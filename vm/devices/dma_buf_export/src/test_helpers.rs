// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Counting mocks of an exporting driver and an importing DMA device.

use crate::device::DmaDevice;
use crate::device::MapSgError;
use crate::error::DmaBufError;
use crate::ops::ExporterOps;
use crate::ops::KernelVa;
use crate::sg_table::DmaAttrs;
use crate::sg_table::DmaDirection;
use crate::sg_table::ScatterGatherTable;
use parking_lot::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trace")),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_table() -> ScatterGatherTable {
    let mut table = ScatterGatherTable::try_with_capacity(3).unwrap();
    table.push(0x10_0000, 0x1000);
    table.push(0x24_0000, 0x3000);
    table.push(0x80_0000, 0x1000);
    table
}

/// An exported memory object that counts calls into it.
#[derive(Default)]
pub struct MockObject {
    pub pins: AtomicUsize,
    pub unpins: AtomicUsize,
    pub tables: AtomicUsize,
    pub vunmaps: AtomicUsize,
    pub pin_error: Mutex<Option<DmaBufError>>,
}

impl MockObject {
    pub fn failing_pin(err: DmaBufError) -> Self {
        Self {
            pin_error: Mutex::new(Some(err)),
            ..Default::default()
        }
    }

    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn unpins(&self) -> usize {
        self.unpins.load(Ordering::SeqCst)
    }

    pub fn tables(&self) -> usize {
        self.tables.load(Ordering::SeqCst)
    }

    fn pin(&self) -> Result<(), DmaBufError> {
        self.pins.fetch_add(1, Ordering::SeqCst);
        match self.pin_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn unpin(&self) {
        self.unpins.fetch_add(1, Ordering::SeqCst);
    }

    fn sg_table(&self) -> Result<ScatterGatherTable, DmaBufError> {
        self.tables.fetch_add(1, Ordering::SeqCst);
        Ok(test_table())
    }
}

pub const VMAP_ADDRESS: KernelVa = KernelVa(0xffff_c900_0000_0000);

/// Every capability present.
pub static FULL_OPS: ExporterOps<MockObject> = ExporterOps {
    pin: Some(MockObject::pin),
    unpin: Some(MockObject::unpin),
    get_sg_table: Some(MockObject::sg_table),
    mmap: Some(|_, vma| {
        vma.flags |= 0x8;
        Ok(())
    }),
    vmap: Some(|_| Some(VMAP_ADDRESS)),
    vunmap: Some(|obj, _| {
        obj.vunmaps.fetch_add(1, Ordering::SeqCst);
    }),
};

/// Only the table capability, as for an exporter whose memory is always
/// resident.
pub static TABLE_ONLY_OPS: ExporterOps<MockObject> = ExporterOps {
    get_sg_table: Some(MockObject::sg_table),
    ..ExporterOps::EMPTY
};

/// Pinning, but no way to build a table.
pub static PIN_ONLY_OPS: ExporterOps<MockObject> = ExporterOps {
    pin: Some(MockObject::pin),
    unpin: Some(MockObject::unpin),
    ..ExporterOps::EMPTY
};

/// Unpin without a matching pin.
pub static UNPIN_ONLY_OPS: ExporterOps<MockObject> = ExporterOps {
    unpin: Some(MockObject::unpin),
    get_sg_table: Some(MockObject::sg_table),
    ..ExporterOps::EMPTY
};

/// An importing device that records map and unmap requests.
pub struct MockDevice {
    id: String,
    maps: AtomicUsize,
    unmapped: Mutex<Vec<DmaDirection>>,
    last_attrs: Mutex<Option<DmaAttrs>>,
    fail_next: Mutex<Option<MapSgError>>,
}

impl MockDevice {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            maps: AtomicUsize::new(0),
            unmapped: Mutex::new(Vec::new()),
            last_attrs: Mutex::new(None),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next_map(&self, err: MapSgError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn map_count(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    pub fn unmap_count(&self) -> usize {
        self.unmapped.lock().len()
    }

    pub fn unmapped(&self) -> Vec<DmaDirection> {
        self.unmapped.lock().clone()
    }

    pub fn last_attrs(&self) -> Option<DmaAttrs> {
        *self.last_attrs.lock()
    }
}

impl DmaDevice for MockDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn map_sg(
        &self,
        table: &mut ScatterGatherTable,
        _direction: DmaDirection,
        attrs: DmaAttrs,
    ) -> Result<(), MapSgError> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        *self.last_attrs.lock() = Some(attrs);
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let mut iova = 0x1_0000_0000;
        for entry in table.entries_mut() {
            entry.dma_address = Some(iova);
            entry.dma_length = entry.length;
            iova += entry.length as u64;
        }
        Ok(())
    }

    fn unmap_sg(&self, table: &ScatterGatherTable, direction: DmaDirection, attrs: DmaAttrs) {
        assert!(table.is_dma_mapped(), "unmapping a table that was never mapped");
        *self.last_attrs.lock() = Some(attrs);
        self.unmapped.lock().push(direction);
    }
}
