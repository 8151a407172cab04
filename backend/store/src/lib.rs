//! # Tiered Storage
//!
//! Dumb key/value persistence for the session bridge. Holds no domain meaning,
//! callers decide what the keys and values are.
//!
//! ## Tiers
//!
//! Ordered by durability, highest priority first:
//! - Persistent: JSON file on disk, survives restarts
//! - Session: Redis keys with an expiry, survive restarts until the TTL runs out
//! - Memory: process-local map, lost on exit
//!
//! ## Policy
//!
//! - Every tier is checked once with a trial write when the store is built
//! - A tier that fails that check, or later fails a write, is marked unusable for
//!   the rest of the store's lifetime. It is never retried.
//! - Reads walk the tiers in priority order and return the first hit
//! - Writes go to every usable tier so a lower tier still answers after a higher
//!   one is wiped behind our back
//! - A memory tier is always present, so a fully broken stack degrades to
//!   memory-only persistence instead of failing
//! - Reads that fail for any reason other than a corrupt value also disable
//!   the tier, so a hung backend costs one timeout, not one per read
//!
//! ## Tombstones
//!
//! A remove that fails leaves the old value behind in that tier. To keep it
//! from being read back later, the store writes [`TOMBSTONE`] instead: first
//! into the failing tier (it may still take writes), then into every tier
//! that did remove the key. Callers treat a tombstone anywhere as "explicitly
//! cleared", which outranks a surviving value in a higher tier.
use tracing::{debug, warn};

pub mod error;
pub mod file;
pub mod memory;
pub mod session;

pub use error::StorageError;
pub use file::FileTier;
pub use memory::MemoryTier;
pub use session::RedisTier;

const TRIAL_KEY: &str = "__tier_trial__";

/// Value left behind when a key could not be removed from every tier.
pub const TOMBSTONE: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierKind {
    Persistent,
    Session,
    Memory,
}

/// One backing store in the fallback chain.
///
/// Implementations report failures instead of panicking; the [`TieredStore`]
/// decides what a failure means.
pub trait StorageTier: Send {
    fn kind(&self) -> TierKind;

    fn get(&mut self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

struct Slot {
    tier: Box<dyn StorageTier>,
    usable: bool,
}

pub struct TieredStore {
    slots: Vec<Slot>,
}

impl TieredStore {
    pub fn new(mut tiers: Vec<Box<dyn StorageTier>>) -> Self {
        if !tiers.iter().any(|tier| tier.kind() == TierKind::Memory) {
            tiers.push(Box::new(MemoryTier::default()));
        }

        // stable, so two tiers of the same kind keep caller order
        tiers.sort_by_key(|tier| tier.kind());

        let slots = tiers
            .into_iter()
            .map(|mut tier| {
                let usable = trial_write(tier.as_mut());
                Slot { tier, usable }
            })
            .collect();

        Self { slots }
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        self.entries(key).into_iter().next().map(|(_, value)| value)
    }

    /// Every hit for `key`, highest priority first.
    pub fn entries(&mut self, key: &str) -> Vec<(TierKind, String)> {
        let mut hits = Vec::new();

        for slot in self.slots.iter_mut().filter(|slot| slot.usable) {
            match slot.tier.get(key) {
                Ok(Some(value)) => hits.push((slot.tier.kind(), value)),
                Ok(None) => {}
                Err(StorageError::Corrupt(e)) => {
                    warn!("Unreadable {key} in {:?} tier: {e}", slot.tier.kind())
                }
                Err(e) => disable(slot, "read", key, e),
            }
        }

        hits
    }

    /// Writes through every usable tier, returning how many accepted the value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<usize, StorageError> {
        let mut written = 0;

        for slot in self.slots.iter_mut().filter(|slot| slot.usable) {
            match slot.tier.set(key, value) {
                Ok(()) => written += 1,
                Err(e) => disable(slot, "write", key, e),
            }
        }

        if written == 0 {
            return Err(StorageError::NoUsableTier);
        }

        Ok(written)
    }

    /// Removes `key` from every usable tier. Returns whether that fully
    /// succeeded; if not, tombstones were written where possible.
    pub fn remove(&mut self, key: &str) -> bool {
        let mut failed = false;

        for slot in self.slots.iter_mut().filter(|slot| slot.usable) {
            if let Err(e) = slot.tier.remove(key) {
                if slot.tier.set(key, TOMBSTONE).is_ok() {
                    debug!("Left tombstone for {key} in {:?} tier", slot.tier.kind());
                }
                disable(slot, "remove", key, e);
                failed = true;
            }
        }

        if !failed {
            return true;
        }

        for slot in self.slots.iter_mut().filter(|slot| slot.usable) {
            if let Err(e) = slot.tier.set(key, TOMBSTONE) {
                disable(slot, "tombstone", key, e);
            }
        }

        false
    }

    pub fn usable_tiers(&self) -> Vec<TierKind> {
        self.slots
            .iter()
            .filter(|slot| slot.usable)
            .map(|slot| slot.tier.kind())
            .collect()
    }
}

fn trial_write(tier: &mut dyn StorageTier) -> bool {
    let result = tier
        .set(TRIAL_KEY, "1")
        .and_then(|_| tier.remove(TRIAL_KEY));

    match result {
        Ok(()) => {
            debug!("{:?} tier usable", tier.kind());
            true
        }
        Err(e) => {
            warn!("{:?} tier failed trial write, disabling: {e}", tier.kind());
            false
        }
    }
}

fn disable(slot: &mut Slot, operation: &str, key: &str, e: StorageError) {
    warn!(
        "{operation} of {key} on {:?} tier failed, disabling tier: {e}",
        slot.tier.kind()
    );
    slot.usable = false;
}
