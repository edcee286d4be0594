//! Subnet allocation for workspace bridge networks.
//!
//! Every workspace gets its own /N carved out of a process-wide pool. The
//! offset only ever moves forward, so ranges are never reused within a
//! process lifetime; the allocator state is persisted inside the workspace
//! store snapshot so a restart does not hand out a subnet that already backs
//! a live network.

use std::{
    net::Ipv4Addr,
    sync::Mutex,
};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::{JinadError, JinadResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Persistable allocator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetState {
    /// First address of the pool.
    pub ip_range_start: Ipv4Addr,

    /// Prefix length of each allocated subnet.
    pub subnet_size: u8,

    /// Addresses consumed so far.
    pub ip_range_current_offset: u32,
}

/// A newly allocated subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    /// The network range.
    pub network: Ipv4Network,

    /// The gateway address, first host of the range.
    pub gateway: Ipv4Addr,
}

/// Hands out disjoint subnets with a strictly increasing offset.
#[derive(Debug)]
pub struct SubnetAllocator {
    state: Mutex<SubnetState>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SubnetAllocator {
    /// Creates an allocator starting from a fresh pool.
    pub fn new(ip_range_start: Ipv4Addr, subnet_size: u8) -> Self {
        Self::from_state(SubnetState {
            ip_range_start,
            subnet_size,
            ip_range_current_offset: 0,
        })
    }

    /// Restores an allocator from persisted state.
    pub fn from_state(state: SubnetState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Allocates the next subnet and advances the offset.
    pub fn allocate(&self) -> JinadResult<Subnet> {
        let mut state = self.state.lock().expect("subnet allocator lock poisoned");

        let block = 1u32 << (32 - state.subnet_size);
        let base = u32::from(state.ip_range_start)
            .checked_add(state.ip_range_current_offset)
            .ok_or_else(|| JinadError::custom(anyhow::anyhow!("subnet pool exhausted")))?;
        base.checked_add(block)
            .ok_or_else(|| JinadError::custom(anyhow::anyhow!("subnet pool exhausted")))?;

        let network = Ipv4Network::new(Ipv4Addr::from(base), state.subnet_size)
            .map_err(JinadError::custom)?;
        let gateway = Ipv4Addr::from(base + 1);

        state.ip_range_current_offset += block;

        Ok(Subnet { network, gateway })
    }

    /// A snapshot of the current state, for persistence.
    pub fn state(&self) -> SubnetState {
        *self.state.lock().expect("subnet allocator lock poisoned")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnets_are_disjoint_and_monotonic() {
        let allocator = SubnetAllocator::new(Ipv4Addr::new(172, 28, 0, 0), 24);

        let subnets: Vec<Subnet> = (0..8).map(|_| allocator.allocate().unwrap()).collect();

        for (i, a) in subnets.iter().enumerate() {
            for b in &subnets[i + 1..] {
                assert!(!a.network.overlaps(b.network), "{} overlaps {}", a.network, b.network);
            }
        }

        let mut last = 0u32;
        for subnet in &subnets {
            let base = u32::from(subnet.network.network());
            assert!(base >= last);
            last = base + 1;
        }

        assert_eq!(subnets[0].network.to_string(), "172.28.0.0/24");
        assert_eq!(subnets[1].network.to_string(), "172.28.1.0/24");
        assert_eq!(subnets[0].gateway, Ipv4Addr::new(172, 28, 0, 1));
    }

    #[test]
    fn test_offset_advances_by_block_size() {
        let allocator = SubnetAllocator::new(Ipv4Addr::new(10, 0, 0, 0), 28);
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        assert_eq!(allocator.state().ip_range_current_offset, 32);
    }

    #[test]
    fn test_restored_state_does_not_reuse_ranges() {
        let allocator = SubnetAllocator::new(Ipv4Addr::new(172, 28, 0, 0), 24);
        allocator.allocate().unwrap();
        let state = allocator.state();

        let restored = SubnetAllocator::from_state(state);
        let next = restored.allocate().unwrap();
        assert_eq!(next.network.to_string(), "172.28.1.0/24");
    }
}
