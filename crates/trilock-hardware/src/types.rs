//! Common types shared by proximity link implementations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// GATT service exposed by the relay peripheral (16-bit `0x1234` expanded).
pub const UNLOCK_SERVICE_UUID: &str = "00001234-0000-1000-8000-00805f9b34fb";

/// GATT characteristic that accepts the unlock command (16-bit `0x5678` expanded).
pub const UNLOCK_CHARACTERISTIC_UUID: &str = "00005678-0000-1000-8000-00805f9b34fb";

/// ASCII `UNLOCK`, the payload the relay firmware expects.
pub const UNLOCK_PAYLOAD: &[u8] = b"UNLOCK";

/// A single advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Hardware identifier (MAC address on Android).
    pub device_id: String,

    /// Advertised or local name, when broadcast.
    pub name: Option<String>,

    /// Received signal strength in dBm, when reported.
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(device_id: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            rssi,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns `true` if the advertiser is at least as strong as `threshold_dbm`.
    ///
    /// Advertisements without an RSSI reading never count as near.
    pub fn is_near(&self, threshold_dbm: i16) -> bool {
        self.rssi.is_some_and(|rssi| rssi >= threshold_dbm)
    }
}

/// Edge-triggered proximity transition reported by a link.
///
/// A link reports `Entered` once when an authorized device connects and
/// `Left` once when that device disconnects. It never repeats `Entered`
/// while the device stays in range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProximityEvent {
    Entered { device_id: String },
    Left { device_id: String },
}

impl ProximityEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Entered { device_id } | Self::Left { device_id } => device_id,
        }
    }
}

/// Shared, live authorization list.
///
/// Clones share the same underlying set, so the owner of the registry can
/// replace the list and every link holding a clone sees the change on its
/// next check.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedIds {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl AuthorizedIds {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let authorized = Self::default();
        authorized.replace(ids);
        authorized
    }

    /// Replace the whole list.
    pub fn replace<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fresh: HashSet<String> = ids.into_iter().map(Into::into).collect();
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = fresh;
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device_id)
    }

    /// Sorted copy of the current list.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_near_threshold() {
        let adv = Advertisement::new("AA:BB", Some(-70));
        assert!(adv.is_near(-80));
        assert!(adv.is_near(-70));
        assert!(!adv.is_near(-65));
    }

    #[test]
    fn test_advertisement_without_rssi_is_far() {
        let adv = Advertisement::new("AA:BB", None).with_name("Beacon");
        assert!(!adv.is_near(-127));
        assert_eq!(adv.name.as_deref(), Some("Beacon"));
    }

    #[test]
    fn test_authorized_ids_shared_between_clones() {
        let ids = AuthorizedIds::new(["AA:BB"]);
        let link_view = ids.clone();
        assert!(link_view.contains("AA:BB"));

        ids.replace(["11:22", "33:44"]);
        assert!(!link_view.contains("AA:BB"));
        assert!(link_view.contains("33:44"));
        assert_eq!(link_view.len(), 2);
    }

    #[test]
    fn test_proximity_event_serialization() {
        let event = ProximityEvent::Entered {
            device_id: "AA:BB".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"entered","device_id":"AA:BB"}"#);
        assert_eq!(event.device_id(), "AA:BB");
    }
}
