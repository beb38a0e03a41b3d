//! Virtual address allocator.
//!
//! Owns the subnet table: `subnet → suffix → allocated ports`. Suffixes and
//! ports are handed out first-gap: the smallest value not currently in use,
//! so released addresses are reused before the range grows. Every operation
//! runs under one mutex and performs no I/O while holding it, which is what
//! keeps allocations stable under concurrent mutation.

use crate::address::{Alias, ClientId, Subnet};
use crate::error::{SignalError, SignalResult};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

/// Highest suffix an id may carry; allocating past this overflows the subnet.
const MAX_SUFFIX: u32 = 255;

/// Allocation record for one suffix: the ports handed out beneath it.
/// Kept sorted so the first-gap scan is a single walk.
#[derive(Debug, Default)]
struct Member {
    ports: Vec<u32>,
}

type SubnetTable = HashMap<Subnet, BTreeMap<u8, Member>>;

/// Concurrent-safe allocator for the overlay's address space.
#[derive(Debug, Default)]
pub struct AddressAllocator {
    subnets: Mutex<SubnetTable>,
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the smallest free suffix in `subnet`, materialising the
    /// subnet bucket on first use. Fails with [`SignalError::SubnetOverflow`]
    /// when the subnet already holds all 256 suffixes.
    pub async fn create_ip(&self, subnet: Subnet) -> SignalResult<ClientId> {
        let mut subnets = self.subnets.lock().await;
        let members = subnets.entry(subnet).or_default();
        let suffix = first_gap(members.keys().map(|s| u32::from(*s)));
        if suffix > MAX_SUFFIX {
            return Err(SignalError::SubnetOverflow(subnet));
        }
        let suffix = suffix as u8;
        members.insert(suffix, Member::default());
        Ok(ClientId::new(subnet, suffix))
    }

    /// Allocate the smallest free port under the suffix of `id`.
    pub async fn create_port(&self, id: ClientId) -> SignalResult<Alias> {
        let mut subnets = self.subnets.lock().await;
        let members = subnets
            .get_mut(&id.subnet())
            .ok_or(SignalError::SubnetDoesNotExist(id.subnet()))?;
        let member = members
            .get_mut(&id.suffix())
            .ok_or(SignalError::SuffixDoesNotExist(id))?;
        let port = first_gap(member.ports.iter().copied());
        let at = member.ports.partition_point(|p| *p < port);
        member.ports.insert(at, port);
        Ok(Alias::new(id, port))
    }

    /// Insert the port of `alias` explicitly, creating the subnet and suffix
    /// buckets as needed. Fails iff the port is already present.
    pub async fn claim_port(&self, alias: Alias) -> SignalResult<()> {
        let mut subnets = self.subnets.lock().await;
        let member = subnets
            .entry(alias.ip().subnet())
            .or_default()
            .entry(alias.ip().suffix())
            .or_default();
        match member.ports.binary_search(&alias.port()) {
            Ok(_) => Err(SignalError::PortAlreadyAllocated(alias)),
            Err(at) => {
                member.ports.insert(at, alias.port());
                Ok(())
            }
        }
    }

    /// Delete the suffix entry of `id`, freeing it and every port under it.
    /// Silently no-ops if the entry is absent.
    pub async fn release_ip(&self, id: ClientId) {
        let mut subnets = self.subnets.lock().await;
        if let Some(members) = subnets.get_mut(&id.subnet()) {
            members.remove(&id.suffix());
        }
    }

    /// Remove the port of `alias` from its suffix bucket. Silently no-ops
    /// if the port (or the bucket) is absent.
    pub async fn release_port(&self, alias: Alias) {
        let mut subnets = self.subnets.lock().await;
        if let Some(member) = subnets
            .get_mut(&alias.ip().subnet())
            .and_then(|members| members.get_mut(&alias.ip().suffix()))
        {
            if let Ok(at) = member.ports.binary_search(&alias.port()) {
                member.ports.remove(at);
            }
        }
    }
}

/// First-gap scan over an ascending sequence: the smallest non-negative
/// integer not present in `used`.
fn first_gap(used: impl Iterator<Item = u32>) -> u32 {
    let mut expected = 0;
    for value in used {
        if value != expected {
            break;
        }
        expected += 1;
    }
    expected
}
