//! Cache lifetimes derived from the chain's own cadence

use std::time::Duration;

use crate::types::ProtocolConstants;

/// Lifetime of values that change every block
pub fn block_ttl(constants: &ProtocolConstants) -> Duration {
    Duration::from_secs(constants.minimal_block_delay.max(1))
}

/// Lifetime of values that change at cycle boundaries: the time left until
/// the current cycle ends, never less than one block
pub fn cycle_ttl(constants: &ProtocolConstants, cycle_position: u64) -> Duration {
    let remaining_blocks = constants
        .blocks_per_cycle
        .saturating_sub(cycle_position)
        .max(1);
    block_ttl(constants).saturating_mul(u32::try_from(remaining_blocks).unwrap_or(u32::MAX))
}

/// A key may be revealed at any block, but a revealed key never goes away
pub fn manager_key_ttl(
    constants: &ProtocolConstants,
    cycle_position: u64,
    revealed: bool,
) -> Duration {
    if revealed {
        cycle_ttl(constants, cycle_position)
    } else {
        block_ttl(constants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(delay: u64, blocks_per_cycle: u64) -> ProtocolConstants {
        ProtocolConstants {
            hard_gas_limit_per_operation: 1_040_000,
            hard_gas_limit_per_block: 1_386_666,
            hard_storage_limit_per_operation: 60_000,
            cost_per_byte: 250,
            origination_size: 257,
            minimal_block_delay: delay,
            blocks_per_cycle,
        }
    }

    #[test]
    fn test_block_ttl_is_block_delay() {
        assert_eq!(block_ttl(&constants(8, 10800)), Duration::from_secs(8));
        assert_eq!(block_ttl(&constants(0, 10800)), Duration::from_secs(1));
    }

    #[test]
    fn test_cycle_ttl_counts_remaining_blocks() {
        let c = constants(8, 10800);
        assert_eq!(cycle_ttl(&c, 0), Duration::from_secs(8 * 10800));
        assert_eq!(cycle_ttl(&c, 10000), Duration::from_secs(8 * 800));
        // last block of the cycle and beyond still live one block
        assert_eq!(cycle_ttl(&c, 10799), Duration::from_secs(8));
        assert_eq!(cycle_ttl(&c, 20000), Duration::from_secs(8));
    }

    #[test]
    fn test_manager_key_ttl_depends_on_reveal() {
        let c = constants(10, 100);
        assert_eq!(manager_key_ttl(&c, 50, false), Duration::from_secs(10));
        assert_eq!(manager_key_ttl(&c, 50, true), Duration::from_secs(500));
    }
}
