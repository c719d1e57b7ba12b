use serde::Serialize;

/// Directional memory bus between two clusters.
///
/// The cost model is affine in the transferred size; it drives both the
/// mapper's communication-cost estimate and the duration of SEND/RECEIVE
/// synchronisation tasks.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryBus {
    /// Cost charged for any non-empty transfer.
    pub fixed_cost: u64,
    /// Additional cost per transferred byte.
    pub cost_per_byte: u64,
}

impl MemoryBus {
    pub fn fixed(fixed_cost: u64) -> Self {
        Self {
            fixed_cost,
            cost_per_byte: 0,
        }
    }

    pub fn cost(&self, bytes: u64) -> u64 {
        if bytes == 0 {
            return 0;
        }
        self.fixed_cost
            .saturating_add(self.cost_per_byte.saturating_mul(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transfer_is_free() {
        let bus = MemoryBus {
            fixed_cost: 10,
            cost_per_byte: 2,
        };
        assert_eq!(bus.cost(0), 0);
        assert_eq!(bus.cost(4), 18);
    }
}
