//! Persisted "re-read on reconnect" entries for bonded sensors.
//!
//! One key per bonded address, `CPS-` followed by the address bytes as
//! upper-case hex in display order, holding the single byte `1`.

use core::fmt::Write as _;

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};
use crate::types::BdAddr;

/// `"CPS-"` plus twelve hex digits.
pub type BondKey = heapless::String<16>;

const BONDED: u8 = 1;

pub fn bond_key(address: &BdAddr) -> BondKey {
    let mut key = BondKey::new();
    // Exactly 16 characters, always fits.
    let _ = key.push_str("CPS-");
    for b in address.bytes() {
        let _ = write!(key, "{:02X}", b);
    }
    key
}

/// Remember that `address` should be re-read when it reconnects.
pub fn mark_bonded(storage: &mut impl StoragePort, namespace: &str, address: &BdAddr) -> Result<(), StorageError> {
    let key = bond_key(address);
    storage.write(namespace, &key, &[BONDED])?;
    info!("Store: {} marked for re-read on reconnect", address);
    Ok(())
}

pub fn forget(storage: &mut impl StoragePort, namespace: &str, address: &BdAddr) -> Result<(), StorageError> {
    storage.delete(namespace, &bond_key(address))?;
    info!("Store: {} bond entry removed", address);
    Ok(())
}

pub fn is_bonded(storage: &impl StoragePort, namespace: &str, address: &BdAddr) -> bool {
    let mut buf = [0u8; 1];
    matches!(storage.read(namespace, &bond_key(address), &mut buf), Ok(1) if buf[0] != 0)
}

/// Move an entry to a re-resolved address. No-op if `from` was not bonded.
pub fn rebind(storage: &mut impl StoragePort, namespace: &str, from: &BdAddr, to: &BdAddr) -> Result<(), StorageError> {
    if !is_bonded(storage, namespace, from) {
        return Ok(());
    }
    mark_bonded(storage, namespace, to)?;
    if let Err(e) = forget(storage, namespace, from) {
        warn!("Store: stale bond entry for {} left behind: {}", from, e);
    }
    Ok(())
}
