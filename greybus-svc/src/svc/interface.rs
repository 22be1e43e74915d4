//! Interface records and the interface table.

use crate::protocol::HotplugData;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Bookkeeping for one module interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub interface_id: u8,
    /// Assigned device id; `None` until the hotplug sequence allocates one.
    pub device_id: Option<u8>,
    pub disconnected: bool,
    /// Module boots its firmware over UniPro; connections skip E2EFC.
    pub boot_over_unipro: bool,
    pub unipro_mfg_id: u32,
    pub unipro_prod_id: u32,
    pub vendor_id: u32,
    pub product_id: u32,
    /// Set once the host finished initializing the interface.
    pub initialized: bool,
}

impl Interface {
    pub fn new(interface_id: u8) -> Self {
        Self {
            interface_id,
            device_id: None,
            disconnected: false,
            boot_over_unipro: false,
            unipro_mfg_id: 0,
            unipro_prod_id: 0,
            vendor_id: 0,
            product_id: 0,
            initialized: false,
        }
    }

    pub fn set_ids(&mut self, data: &HotplugData) {
        self.unipro_mfg_id = data.unipro_mfg_id;
        self.unipro_prod_id = data.unipro_prod_id;
        self.vendor_id = data.ara_vend_id;
        self.product_id = data.ara_prod_id;
    }
}

/// Interface table keyed by interface id.
///
/// Only the deferred worker inserts and removes entries; diagnostic readers
/// take snapshots.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    entries: RwLock<BTreeMap<u8, Interface>>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, intf_id: u8) -> Option<Interface> {
        self.read().get(&intf_id).cloned()
    }

    /// Insert a fresh record. Returns `false` if one is already present,
    /// leaving it untouched.
    pub fn insert(&self, intf: Interface) -> bool {
        let mut entries = self.write();
        if entries.contains_key(&intf.interface_id) {
            return false;
        }
        entries.insert(intf.interface_id, intf);
        true
    }

    /// Apply `f` to the record for `intf_id`, if present.
    pub fn update<F>(&self, intf_id: u8, f: F) -> Option<Interface>
    where
        F: FnOnce(&mut Interface),
    {
        let mut entries = self.write();
        let intf = entries.get_mut(&intf_id)?;
        f(intf);
        Some(intf.clone())
    }

    pub fn remove(&self, intf_id: u8) -> Option<Interface> {
        self.write().remove(&intf_id)
    }

    pub fn snapshot(&self) -> Vec<Interface> {
        self.read().values().cloned().collect()
    }


    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u8, Interface>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u8, Interface>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_never_overwrites() {
        let table = InterfaceTable::new();
        let mut first = Interface::new(5);
        first.vendor_id = 1;
        assert!(table.insert(first));

        let mut second = Interface::new(5);
        second.vendor_id = 2;
        assert!(!table.insert(second));

        assert_eq!(table.snapshot().len(), 1);
        assert_eq!(table.get(5).unwrap().vendor_id, 1);
    }

    #[test]
    fn test_update_and_remove() {
        let table = InterfaceTable::new();
        table.insert(Interface::new(3));

        let updated = table.update(3, |intf| intf.device_id = Some(2)).unwrap();
        assert_eq!(updated.device_id, Some(2));
        assert!(table.update(4, |intf| intf.device_id = Some(9)).is_none());

        let removed = table.remove(3).unwrap();
        assert_eq!(removed.device_id, Some(2));
        assert!(table.snapshot().is_empty());
        assert!(table.remove(3).is_none());
    }

    #[test]
    fn test_set_ids() {
        let mut intf = Interface::new(1);
        intf.set_ids(&HotplugData {
            unipro_mfg_id: 0x126,
            unipro_prod_id: 0x1000,
            ara_vend_id: 0xfeed,
            ara_prod_id: 0xbeef,
        });
        assert_eq!(intf.vendor_id, 0xfeed);
        assert_eq!(intf.product_id, 0xbeef);
    }
}
