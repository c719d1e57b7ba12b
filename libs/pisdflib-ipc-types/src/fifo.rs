/// Access semantics of a FIFO entry inside a job message.
///
/// The discriminant values are the wire encoding; the order matches the
/// dispatch tables used by the worker-side buffer reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FifoAttribute {
    /// Read/write alias into a buffer owned by another FIFO; no copy, no
    /// count bookkeeping on release.
    RwOnly = 0,
    /// Read/write with ownership: reading decrements the reference count,
    /// writing allocates.
    RwOwn = 1,
    /// Backed by an externally registered buffer; never allocated nor freed
    /// by the runtime.
    RwExt = 2,
    /// Merged input: the entry describes a runtime-concatenated buffer, the
    /// following `offset` entries in the list are its constituents.
    RMerge = 3,
    /// Repeat input: the runtime tiles (or truncates) the single following
    /// entry into a buffer of this size.
    RRepeat = 4,
    /// Write-only sink (consumed bytes are dropped).
    WSink = 5,
    /// Read/write where the count is patched after scheduling.
    RwAuto = 6,
    /// Absorbed constituent of a merged FIFO; readers skip it.
    Dummy = 7,
}

impl FifoAttribute {
    pub const COUNT: usize = 8;

    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::RwOnly,
            1 => Self::RwOwn,
            2 => Self::RwExt,
            3 => Self::RMerge,
            4 => Self::RRepeat,
            5 => Self::WSink,
            6 => Self::RwAuto,
            7 => Self::Dummy,
            _ => return None,
        })
    }
}

/// One FIFO entry of a job message.
///
/// `address` is a virtual buffer identifier handed out by the allocator,
/// `offset`/`size` select a byte window inside it and `count` is the number
/// of consumers that still have to read the buffer before it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fifo {
    pub address: u64,
    pub offset: u32,
    pub size: u32,
    pub count: u16,
    pub attribute: FifoAttribute,
}

impl Default for Fifo {
    fn default() -> Self {
        Self {
            address: 0,
            offset: 0,
            size: 0,
            count: 0,
            attribute: FifoAttribute::Dummy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_round_trips_through_u8() {
        for raw in 0..FifoAttribute::COUNT as u8 {
            let attr = FifoAttribute::from_u8(raw).expect("valid attribute");
            assert_eq!(attr as u8, raw);
        }
        assert_eq!(FifoAttribute::from_u8(8), None);
    }

    #[test]
    fn default_fifo_is_inert() {
        let fifo = Fifo::default();
        assert_eq!(fifo.size, 0);
        assert_eq!(fifo.attribute, FifoAttribute::Dummy);
    }
}
