use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{trace, warn};

/// Virtual-address space shared by every worker.
///
/// Buffers are identified, never addressed: each allocation gets a fresh
/// id from the allocator and lives until its read count drains. External
/// and persistent-delay buffers sit in separate spaces and are never
/// freed.
pub struct MemoryInterface {
    slots: Mutex<HashMap<u64, Slot>>,
    /// Count fix-ups that arrived ahead of the allocation they patch.
    pending: Mutex<HashMap<u64, i64>>,
    externals: Vec<Mutex<Vec<u8>>>,
    persistent: Mutex<HashMap<u64, Vec<u8>>>,
}

struct Slot {
    data: Vec<u8>,
    remaining: i64,
}

impl MemoryInterface {
    pub fn new(externals: Vec<Vec<u8>>, persistent_delays: &[(u64, usize)]) -> Self {
        let persistent = persistent_delays
            .iter()
            .map(|&(address, size)| (address, vec![0u8; size]))
            .collect();
        Self {
            slots: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            externals: externals.into_iter().map(Mutex::new).collect(),
            persistent: Mutex::new(persistent),
        }
    }

    /// Create (or find) the buffer behind `address`. Idempotent so a
    /// merged buffer's reader can allocate lazily.
    pub fn allocate(&self, address: u64, size: u32, count: u16) {
        let mut slots = self.slots.lock();
        let pending = self.pending.lock().remove(&address).unwrap_or(0);
        slots.entry(address).or_insert_with(|| {
            trace!(address, size, count, "buffer allocated");
            Slot {
                data: vec![0u8; size as usize],
                remaining: i64::from(count) + pending,
            }
        });
    }

    pub fn write(&self, address: u64, offset: u32, bytes: &[u8]) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(&address) else {
            warn!(address, "write to unallocated buffer");
            return;
        };
        let start = offset as usize;
        let end = start + bytes.len();
        if end > slot.data.len() {
            slot.data.resize(end, 0);
        }
        slot.data[start..end].copy_from_slice(bytes);
    }

    pub fn read(&self, address: u64, offset: u32, size: u32) -> Vec<u8> {
        let slots = self.slots.lock();
        let Some(slot) = slots.get(&address) else {
            warn!(address, "read from unallocated buffer");
            return vec![0u8; size as usize];
        };
        let start = offset as usize;
        let end = (start + size as usize).min(slot.data.len());
        let mut out = vec![0u8; size as usize];
        if start < end {
            out[..end - start].copy_from_slice(&slot.data[start..end]);
        }
        out
    }

    /// Additional (or early) readers for a buffer; additive and safe to
    /// apply before the allocation lands.
    pub fn add_count(&self, address: u64, delta: i64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&address) {
            slot.remaining += delta;
        } else {
            *self.pending.lock().entry(address).or_insert(0) += delta;
        }
    }

    /// Consume `n` reads; the buffer is released when the count drains.
    pub fn consume(&self, address: u64, n: u16) {
        if n == 0 {
            return;
        }
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&address) {
            slot.remaining -= i64::from(n);
            if slot.remaining <= 0 {
                slots.remove(&address);
                trace!(address, "buffer released");
            }
        }
    }

    pub fn live_buffer_count(&self) -> usize {
        self.slots.lock().len()
    }

    // =====================================================================
    // External buffers
    // =====================================================================

    pub fn read_external(&self, buffer: usize, offset: u32, size: u32) -> Vec<u8> {
        let Some(external) = self.externals.get(buffer) else {
            warn!(buffer, "read from unknown external buffer");
            return vec![0u8; size as usize];
        };
        let data = external.lock();
        let start = offset as usize;
        let end = (start + size as usize).min(data.len());
        let mut out = vec![0u8; size as usize];
        if start < end {
            out[..end - start].copy_from_slice(&data[start..end]);
        }
        out
    }

    pub fn write_external(&self, buffer: usize, offset: u32, bytes: &[u8]) {
        let Some(external) = self.externals.get(buffer) else {
            warn!(buffer, "write to unknown external buffer");
            return;
        };
        let mut data = external.lock();
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
    }

    pub fn external_contents(&self, buffer: usize) -> Vec<u8> {
        self.externals
            .get(buffer)
            .map(|b| b.lock().clone())
            .unwrap_or_default()
    }

    // =====================================================================
    // Persistent delay buffers
    // =====================================================================

    pub fn read_persistent(&self, address: u64) -> Vec<u8> {
        self.persistent
            .lock()
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    pub fn write_persistent(&self, address: u64, bytes: &[u8]) {
        if let Some(buffer) = self.persistent.lock().get_mut(&address) {
            let len = buffer.len().min(bytes.len());
            buffer[..len].copy_from_slice(&bytes[..len]);
        } else {
            warn!(address, "write to unknown persistent buffer");
        }
    }
}
