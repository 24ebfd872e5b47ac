//! Authorized hardware keys and registered simulation devices.
//!
//! The registry is plain data with lookup predicates. The engine reads it on
//! every trigger and pushes [`DeviceRegistry::bluetooth_ids`] into the
//! proximity link whenever the device list changes.

use crate::{
    Result,
    constants::{KEY_ID_PREFIX, NEW_KEY_BATTERY_LEVEL},
    error::Error,
    types::{AuthorizedKey, BiometricKind, DeviceKind, RegisteredDevice},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistry {
    #[serde(default)]
    keys: Vec<AuthorizedKey>,
    #[serde(default)]
    devices: Vec<RegisteredDevice>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from initial contents, rejecting duplicate ids.
    ///
    /// # Errors
    /// Returns `Error::DuplicateId` if a key or device id repeats.
    pub fn from_parts(keys: Vec<AuthorizedKey>, devices: Vec<RegisteredDevice>) -> Result<Self> {
        let mut registry = Self::new();
        for key in keys {
            registry.insert_key(key)?;
        }
        for device in devices {
            registry.register_device(device)?;
        }
        Ok(registry)
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    /// Returns `true` if any registered device has the given kind.
    #[must_use]
    pub fn has_device_of_kind(&self, kind: DeviceKind) -> bool {
        self.devices.iter().any(|d| d.kind == kind)
    }

    /// Returns `true` if any key has both fingerprint and vein enrolled.
    #[must_use]
    pub fn has_fully_enrolled_key(&self) -> bool {
        self.keys.iter().any(AuthorizedKey::has_full_enrollment)
    }

    /// Hardware identifiers of every `Bluetooth` device.
    ///
    /// This is the authorization list the proximity link filters by.
    #[must_use]
    pub fn bluetooth_ids(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Bluetooth)
            .map(|d| d.id.clone())
            .collect()
    }

    #[must_use]
    pub fn keys(&self) -> &[AuthorizedKey] {
        &self.keys
    }

    #[must_use]
    pub fn devices(&self) -> &[RegisteredDevice] {
        &self.devices
    }

    #[must_use]
    pub fn key(&self, id: &str) -> Option<&AuthorizedKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    #[must_use]
    pub fn device(&self, id: &str) -> Option<&RegisteredDevice> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Keys whose battery is at or below the low-battery threshold.
    pub fn low_battery_keys(&self) -> impl Iterator<Item = &AuthorizedKey> {
        self.keys.iter().filter(|k| k.is_battery_low())
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    /// Register a new key under the next free `KEY-NNN` id.
    ///
    /// The key starts at full battery with no biometrics enrolled.
    ///
    /// # Errors
    /// Returns `Error::InvalidId` for a blank name, or when the highest
    /// numeric key id leaves no successor.
    pub fn register_key(&mut self, name: &str) -> Result<AuthorizedKey> {
        let key = AuthorizedKey::new(self.next_key_id()?, name.trim(), NEW_KEY_BATTERY_LEVEL)?;
        self.keys.push(key.clone());
        Ok(key)
    }

    /// Insert a fully specified key.
    ///
    /// # Errors
    /// Returns `Error::DuplicateId` if the id is already registered, or the
    /// error from [`AuthorizedKey::validate`].
    pub fn insert_key(&mut self, key: AuthorizedKey) -> Result<()> {
        key.validate()?;
        if self.key(&key.id).is_some() {
            return Err(Error::DuplicateId(key.id));
        }
        self.keys.push(key);
        Ok(())
    }

    /// # Errors
    /// Returns `Error::UnknownKey` if no key has this id.
    pub fn revoke_key(&mut self, id: &str) -> Result<AuthorizedKey> {
        let index = self
            .keys
            .iter()
            .position(|k| k.id == id)
            .ok_or_else(|| Error::UnknownKey(id.to_string()))?;
        Ok(self.keys.remove(index))
    }

    /// Set one biometric enrollment flag on a key.
    ///
    /// # Errors
    /// Returns `Error::UnknownKey` if no key has this id.
    pub fn set_biometric_flag(
        &mut self,
        id: &str,
        kind: BiometricKind,
        enrolled: bool,
    ) -> Result<&AuthorizedKey> {
        let key = self.key_mut(id)?;
        key.set_enrolled(kind, enrolled);
        Ok(key)
    }

    /// Flip one biometric enrollment flag on a key.
    ///
    /// # Errors
    /// Returns `Error::UnknownKey` if no key has this id.
    pub fn toggle_biometric(&mut self, id: &str, kind: BiometricKind) -> Result<&AuthorizedKey> {
        let key = self.key_mut(id)?;
        let enrolled = !key.is_enrolled(kind);
        key.set_enrolled(kind, enrolled);
        Ok(key)
    }

    fn key_mut(&mut self, id: &str) -> Result<&mut AuthorizedKey> {
        self.keys
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or_else(|| Error::UnknownKey(id.to_string()))
    }

    fn next_key_id(&self) -> Result<String> {
        let highest = self
            .keys
            .iter()
            .filter_map(|k| k.id.strip_prefix(KEY_ID_PREFIX))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let next = highest.checked_add(1).ok_or_else(|| {
            Error::InvalidId(format!("no key id available after {KEY_ID_PREFIX}{highest}"))
        })?;
        Ok(format!("{KEY_ID_PREFIX}{next:03}"))
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns `Error::DuplicateId` if the id is already registered, or the
    /// error from [`RegisteredDevice::validate`].
    pub fn register_device(&mut self, device: RegisteredDevice) -> Result<()> {
        device.validate()?;
        if self.device(&device.id).is_some() {
            return Err(Error::DuplicateId(device.id));
        }
        self.devices.push(device);
        Ok(())
    }

    /// # Errors
    /// Returns `Error::UnknownDevice` if no device has this id.
    pub fn revoke_device(&mut self, id: &str) -> Result<RegisteredDevice> {
        let index = self
            .devices
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;
        Ok(self.devices.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(id: &str) -> RegisteredDevice {
        RegisteredDevice::new(id, "Beacon", DeviceKind::Bluetooth).unwrap()
    }

    fn phone(id: &str) -> RegisteredDevice {
        RegisteredDevice::new(id, "Phone", DeviceKind::Phone).unwrap()
    }

    #[test]
    fn test_empty_registry_satisfies_nothing() {
        let registry = DeviceRegistry::new();
        assert!(!registry.has_device_of_kind(DeviceKind::Bluetooth));
        assert!(!registry.has_device_of_kind(DeviceKind::Phone));
        assert!(!registry.has_fully_enrolled_key());
        assert!(registry.bluetooth_ids().is_empty());
    }

    #[test]
    fn test_register_key_mints_sequential_ids() {
        let mut registry = DeviceRegistry::new();
        let first = registry.register_key("Front door").unwrap();
        let second = registry.register_key("Back door").unwrap();

        assert_eq!(first.id, "KEY-001");
        assert_eq!(second.id, "KEY-002");
        assert_eq!(first.battery_level, 100);
        assert!(!first.has_full_enrollment());
    }

    #[test]
    fn test_register_key_skips_past_existing_ids() {
        let mut registry = DeviceRegistry::new();
        registry
            .insert_key(AuthorizedKey::new("KEY-041", "Legacy", 60).unwrap())
            .unwrap();
        let minted = registry.register_key("New").unwrap();
        assert_eq!(minted.id, "KEY-042");
    }

    #[test]
    fn test_register_key_after_highest_possible_id() {
        let mut registry = DeviceRegistry::new();
        registry
            .insert_key(AuthorizedKey::new("KEY-4294967295", "Last", 60).unwrap())
            .unwrap();

        let result = registry.register_key("New");
        assert!(matches!(result, Err(Error::InvalidId(_))));
        assert_eq!(registry.keys().len(), 1);

        // Revoking the blocker frees the id space again.
        registry.revoke_key("KEY-4294967295").unwrap();
        assert_eq!(registry.register_key("New").unwrap().id, "KEY-001");
    }

    #[test]
    fn test_register_key_rejects_blank_name() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.register_key("   "),
            Err(Error::InvalidId(_))
        ));
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_full_enrollment_requires_both_flags() {
        let mut registry = DeviceRegistry::new();
        let key = registry.register_key("Master").unwrap();

        registry
            .set_biometric_flag(&key.id, BiometricKind::Fingerprint, true)
            .unwrap();
        assert!(!registry.has_fully_enrolled_key());

        let updated = registry.toggle_biometric(&key.id, BiometricKind::Vein).unwrap();
        assert!(updated.vein_enrolled);
        assert!(registry.has_fully_enrolled_key());

        registry
            .set_biometric_flag(&key.id, BiometricKind::Fingerprint, false)
            .unwrap();
        assert!(!registry.has_fully_enrolled_key());
    }

    #[test]
    fn test_revoke_unknown_key() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.revoke_key("KEY-999"),
            Err(Error::UnknownKey(id)) if id == "KEY-999"
        ));
        assert!(registry
            .set_biometric_flag("KEY-999", BiometricKind::Vein, true)
            .is_err());
    }

    #[test]
    fn test_revoke_key_removes_it() {
        let mut registry = DeviceRegistry::new();
        let key = registry.register_key("Temp").unwrap();
        let revoked = registry.revoke_key(&key.id).unwrap();
        assert_eq!(revoked.id, key.id);
        assert!(registry.key(&key.id).is_none());
    }

    #[test]
    fn test_device_kinds_and_bluetooth_ids() {
        let mut registry = DeviceRegistry::new();
        registry.register_device(beacon("AA:BB:CC:DD:EE:FF")).unwrap();
        registry.register_device(phone("PHONE-1")).unwrap();
        registry.register_device(beacon("11:22:33:44:55:66")).unwrap();

        assert!(registry.has_device_of_kind(DeviceKind::Bluetooth));
        assert!(registry.has_device_of_kind(DeviceKind::Phone));
        assert_eq!(
            registry.bluetooth_ids(),
            vec!["AA:BB:CC:DD:EE:FF".to_string(), "11:22:33:44:55:66".to_string()]
        );

        registry.revoke_device("PHONE-1").unwrap();
        assert!(!registry.has_device_of_kind(DeviceKind::Phone));
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let mut registry = DeviceRegistry::new();
        registry.register_device(beacon("AA")).unwrap();
        assert!(matches!(
            registry.register_device(beacon("AA")),
            Err(Error::DuplicateId(_))
        ));
        assert!(matches!(
            registry.revoke_device("BB"),
            Err(Error::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_insertion_rejects_blank_entries() {
        let mut registry = DeviceRegistry::new();
        let mut device = beacon("AA");
        device.name = " ".to_string();
        assert!(matches!(
            registry.register_device(device),
            Err(Error::InvalidId(_))
        ));

        let mut key = AuthorizedKey::new("KEY-009", "Spare", 50).unwrap();
        key.id = String::new();
        assert!(matches!(registry.insert_key(key), Err(Error::InvalidId(_))));
        assert!(registry.keys().is_empty());
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn test_from_parts_rejects_duplicate_keys() {
        let key = AuthorizedKey::new("KEY-001", "A", 90).unwrap();
        let result = DeviceRegistry::from_parts(vec![key.clone(), key], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_low_battery_keys() {
        let mut registry = DeviceRegistry::new();
        registry
            .insert_key(AuthorizedKey::new("KEY-001", "A", 20).unwrap())
            .unwrap();
        registry
            .insert_key(AuthorizedKey::new("KEY-002", "B", 21).unwrap())
            .unwrap();
        let low: Vec<_> = registry.low_battery_keys().map(|k| k.id.as_str()).collect();
        assert_eq!(low, vec!["KEY-001"]);
    }
}
