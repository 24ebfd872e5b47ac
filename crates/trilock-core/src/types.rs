use crate::{
    Result,
    constants::{LOW_BATTERY_THRESHOLD, REQUIRED_PHASE_COUNT},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One discrete step in the multi-factor unlock sequence.
///
/// `Proximity`, `Fingerprint` and `Vein` are the three required factors.
/// `Idle` and `Unlocked` describe the lock itself and can never be verified
/// or triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Proximity,
    Fingerprint,
    Vein,
    Unlocked,
}

impl Phase {
    /// The three required factors, in their canonical display order.
    pub const REQUIRED: [Phase; REQUIRED_PHASE_COUNT] =
        [Phase::Proximity, Phase::Fingerprint, Phase::Vein];

    /// Returns `true` for `Proximity`, `Fingerprint` and `Vein`.
    #[inline]
    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, Phase::Proximity | Phase::Fingerprint | Phase::Vein)
    }

    /// Upper-case label used in journal details and audit digests.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Proximity => "PROXIMITY",
            Phase::Fingerprint => "FINGERPRINT",
            Phase::Vein => "VEIN",
            Phase::Unlocked => "UNLOCKED",
        }
    }

    /// Validate that this phase may be passed to a trigger operation.
    ///
    /// # Errors
    /// Returns `Error::UntriggerablePhase` for `Idle` and `Unlocked`.
    pub fn ensure_triggerable(self) -> Result<Self> {
        if self.is_required() {
            Ok(self)
        } else {
            Err(Error::UntriggerablePhase { phase: self })
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Phase::Idle),
            "proximity" => Ok(Phase::Proximity),
            "fingerprint" => Ok(Phase::Fingerprint),
            "vein" => Ok(Phase::Vein),
            "unlocked" => Ok(Phase::Unlocked),
            other => Err(Error::InvalidId(format!("unknown phase: {other}"))),
        }
    }
}

/// Whether the lock validates factors against simulated credentials or
/// against enrolled hardware keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    Simulation,
    Hardware,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionMode::Simulation => write!(f, "SIMULATION"),
            ConnectionMode::Hardware => write!(f, "HARDWARE"),
        }
    }
}

/// What a verified-phase set should do when the connection mode changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSwitchPolicy {
    /// Keep already verified phases across a mode switch.
    ///
    /// Factors verified against simulated credentials stay verified after
    /// switching to `Hardware`.
    #[default]
    RetainVerified,

    /// Clear verified phases and re-lock on every mode switch.
    ResetVerified,
}

/// Biometric factor carried by a hardware key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricKind {
    Fingerprint,
    Vein,
}

impl fmt::Display for BiometricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BiometricKind::Fingerprint => write!(f, "fingerprint"),
            BiometricKind::Vein => write!(f, "vein"),
        }
    }
}

/// Hardware credential used in `Hardware` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedKey {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub fingerprint_enrolled: bool,
    #[serde(default)]
    pub vein_enrolled: bool,
    /// Battery charge in percent (0-100).
    pub battery_level: u8,
}

impl AuthorizedKey {
    /// Create a key with no biometrics enrolled.
    ///
    /// # Errors
    /// Returns `Error::InvalidId` for a blank id or name and
    /// `Error::InvalidBatteryLevel` above 100 %.
    pub fn new(id: impl Into<String>, name: impl Into<String>, battery_level: u8) -> Result<Self> {
        let key = Self {
            id: id.into(),
            name: name.into(),
            fingerprint_enrolled: false,
            vein_enrolled: false,
            battery_level,
        };
        key.validate()?;
        Ok(key)
    }

    /// Check a key that did not come through [`AuthorizedKey::new`].
    ///
    /// # Errors
    /// Same as [`AuthorizedKey::new`].
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidId("key id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidId(format!(
                "key {} name must not be empty",
                self.id
            )));
        }
        if self.battery_level > 100 {
            return Err(Error::InvalidBatteryLevel(self.battery_level));
        }
        Ok(())
    }

    /// Mark both biometric factors as enrolled.
    #[must_use]
    pub fn fully_enrolled(mut self) -> Self {
        self.fingerprint_enrolled = true;
        self.vein_enrolled = true;
        self
    }

    /// A key can authorize biometric phases only with both factors enrolled.
    #[must_use]
    pub fn has_full_enrollment(&self) -> bool {
        self.fingerprint_enrolled && self.vein_enrolled
    }

    #[must_use]
    pub fn is_battery_low(&self) -> bool {
        self.battery_level <= LOW_BATTERY_THRESHOLD
    }

    #[must_use]
    pub fn is_enrolled(&self, kind: BiometricKind) -> bool {
        match kind {
            BiometricKind::Fingerprint => self.fingerprint_enrolled,
            BiometricKind::Vein => self.vein_enrolled,
        }
    }

    pub(crate) fn set_enrolled(&mut self, kind: BiometricKind, enrolled: bool) {
        match kind {
            BiometricKind::Fingerprint => self.fingerprint_enrolled = enrolled,
            BiometricKind::Vein => self.vein_enrolled = enrolled,
        }
    }
}

/// Kind of simulation-mode credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Proximity beacon; satisfies the `Proximity` check.
    Bluetooth,
    /// Paired phone; satisfies the `Fingerprint` check.
    Phone,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKind::Bluetooth => write!(f, "BLUETOOTH"),
            DeviceKind::Phone => write!(f, "PHONE"),
        }
    }
}

/// Simulation-mode credential.
///
/// For `Bluetooth` devices the id is the hardware identifier (MAC address on
/// Android) that the proximity link filters advertisements by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl RegisteredDevice {
    /// # Errors
    /// Returns `Error::InvalidId` for a blank id or name.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: DeviceKind) -> Result<Self> {
        let device = Self {
            id: id.into(),
            name: name.into(),
            kind,
        };
        device.validate()?;
        Ok(device)
    }

    /// # Errors
    /// Same as [`RegisteredDevice::new`].
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidId("device id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidId(format!(
                "device {} name must not be empty",
                self.id
            )));
        }
        Ok(())
    }
}

/// Outcome recorded on a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    Failure,
    Pending,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventOutcome::Success => write!(f, "SUCCESS"),
            EventOutcome::Failure => write!(f, "FAILURE"),
            EventOutcome::Pending => write!(f, "PENDING"),
        }
    }
}

/// An entry in the security journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub outcome: EventOutcome,
    pub detail: String,
    /// Connection mode active when the event was produced.
    pub source: ConnectionMode,
}

impl SecurityEvent {
    /// Create an event stamped with the current time and a fresh id.
    pub fn new(
        phase: Phase,
        outcome: EventOutcome,
        detail: impl Into<String>,
        source: ConnectionMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            phase,
            outcome,
            detail: detail.into(),
            source,
        }
    }

    pub fn success(phase: Phase, detail: impl Into<String>, source: ConnectionMode) -> Self {
        Self::new(phase, EventOutcome::Success, detail, source)
    }

    pub fn failure(phase: Phase, detail: impl Into<String>, source: ConnectionMode) -> Self {
        Self::new(phase, EventOutcome::Failure, detail, source)
    }

    pub fn pending(phase: Phase, detail: impl Into<String>, source: ConnectionMode) -> Self {
        Self::new(phase, EventOutcome::Pending, detail, source)
    }

    /// Render the event as one audit digest line.
    #[must_use]
    pub fn audit_line(&self) -> String {
        format!(
            "[{}] Phase: {}, Status: {}, Details: {}",
            self.timestamp.to_rfc3339(),
            self.phase,
            self.outcome,
            self.detail
        )
    }
}

/// Insertion-ordered set of verified required phases.
///
/// Only required phases can be inserted and each at most once, so the set
/// never holds `Idle`/`Unlocked` and never grows beyond three entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifiedPhases(Vec<Phase>);

impl VerifiedPhases {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::with_capacity(REQUIRED_PHASE_COUNT))
    }

    /// Append a phase, keeping insertion order.
    ///
    /// Returns `false` if the phase was already present.
    ///
    /// # Errors
    /// Returns `Error::NotARequiredPhase` for `Idle` and `Unlocked`.
    pub fn insert(&mut self, phase: Phase) -> Result<bool> {
        if !phase.is_required() {
            return Err(Error::NotARequiredPhase { phase });
        }
        if self.0.contains(&phase) {
            return Ok(false);
        }
        self.0.push(phase);
        Ok(true)
    }

    /// Remove a phase. Returns `true` if it was present.
    pub fn remove(&mut self, phase: Phase) -> bool {
        let before = self.0.len();
        self.0.retain(|p| *p != phase);
        self.0.len() != before
    }

    #[must_use]
    pub fn contains(&self, phase: Phase) -> bool {
        self.0.contains(&phase)
    }

    /// Most recently verified phase still present.
    #[must_use]
    pub fn last(&self) -> Option<Phase> {
        self.0.last().copied()
    }

    /// Returns `true` once every required phase has been verified.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        Phase::REQUIRED.iter().all(|p| self.0.contains(p))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Phase> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Phase] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Authoritative snapshot of the lock.
///
/// Snapshots are replaced wholesale by the engine; readers never observe a
/// partially applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub current_phase: Phase,
    pub verified_phases: VerifiedPhases,
    pub is_locked: bool,
    pub last_unlock_time: Option<DateTime<Utc>>,
    pub active_alarms: Vec<String>,
    pub connection_mode: ConnectionMode,
    pub fault_injection_enabled: bool,
}

impl LockState {
    /// Locked, idle state in the given connection mode.
    #[must_use]
    pub fn new(connection_mode: ConnectionMode) -> Self {
        Self {
            current_phase: Phase::Idle,
            verified_phases: VerifiedPhases::new(),
            is_locked: true,
            last_unlock_time: None,
            active_alarms: Vec::new(),
            connection_mode,
            fault_injection_enabled: false,
        }
    }

    /// Returns `true` while the enclosure is physically disengaged.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        !self.is_locked && self.current_phase == Phase::Unlocked
    }

    /// Check the structural invariants of the snapshot.
    ///
    /// - an unlocked snapshot sits in `Unlocked` with every required phase verified
    /// - `current_phase == Unlocked` only while unlocked
    /// - the verified set holds at most the three required phases
    ///
    /// # Errors
    /// Returns `Error::InvariantViolation` describing the first violated invariant.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.is_locked
            && (self.current_phase != Phase::Unlocked || !self.verified_phases.is_complete())
        {
            return Err(Error::InvariantViolation(format!(
                "unlocked state must be in UNLOCKED with all phases verified (current {}, verified {})",
                self.current_phase,
                self.verified_phases.len()
            )));
        }
        if self.current_phase == Phase::Unlocked && self.is_locked {
            return Err(Error::InvariantViolation(
                "UNLOCKED phase reported while locked".to_string(),
            ));
        }
        if self.verified_phases.iter().any(|p| !p.is_required()) {
            return Err(Error::InvariantViolation(
                "verified phases contain a non-required phase".to_string(),
            ));
        }
        if self.verified_phases.len() > REQUIRED_PHASE_COUNT {
            return Err(Error::InvariantViolation(format!(
                "verified phase count {} exceeds {}",
                self.verified_phases.len(),
                REQUIRED_PHASE_COUNT
            )));
        }
        Ok(())
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::new(ConnectionMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Phase::Proximity, true)]
    #[case(Phase::Fingerprint, true)]
    #[case(Phase::Vein, true)]
    #[case(Phase::Idle, false)]
    #[case(Phase::Unlocked, false)]
    fn test_phase_is_required(#[case] phase: Phase, #[case] expected: bool) {
        assert_eq!(phase.is_required(), expected);
        assert_eq!(phase.ensure_triggerable().is_ok(), expected);
    }

    #[rstest]
    #[case("proximity", Phase::Proximity)]
    #[case("FINGERPRINT", Phase::Fingerprint)]
    #[case(" vein ", Phase::Vein)]
    fn test_phase_from_str(#[case] input: &str, #[case] expected: Phase) {
        assert_eq!(input.parse::<Phase>().unwrap(), expected);
    }

    #[test]
    fn test_phase_from_str_rejects_unknown() {
        assert!("retina".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_display_uses_label() {
        assert_eq!(Phase::Proximity.to_string(), "PROXIMITY");
        assert_eq!(Phase::Unlocked.to_string(), "UNLOCKED");
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::Fingerprint).unwrap();
        assert_eq!(json, "\"fingerprint\"");
    }

    #[test]
    fn test_verified_phases_keeps_insertion_order() {
        let mut verified = VerifiedPhases::new();
        assert!(verified.insert(Phase::Vein).unwrap());
        assert!(verified.insert(Phase::Proximity).unwrap());
        assert_eq!(verified.as_slice(), &[Phase::Vein, Phase::Proximity]);
        assert_eq!(verified.last(), Some(Phase::Proximity));
    }

    #[test]
    fn test_verified_phases_rejects_duplicates() {
        let mut verified = VerifiedPhases::new();
        assert!(verified.insert(Phase::Vein).unwrap());
        assert!(!verified.insert(Phase::Vein).unwrap());
        assert_eq!(verified.len(), 1);
    }

    #[rstest]
    #[case(Phase::Idle)]
    #[case(Phase::Unlocked)]
    fn test_verified_phases_rejects_non_required(#[case] phase: Phase) {
        let mut verified = VerifiedPhases::new();
        assert!(matches!(
            verified.insert(phase),
            Err(Error::NotARequiredPhase { .. })
        ));
        assert!(verified.is_empty());
    }

    #[test]
    fn test_verified_phases_complete() {
        let mut verified = VerifiedPhases::new();
        for phase in Phase::REQUIRED {
            assert!(!verified.is_complete());
            verified.insert(phase).unwrap();
        }
        assert!(verified.is_complete());
        assert!(verified.remove(Phase::Fingerprint));
        assert!(!verified.is_complete());
        assert!(!verified.remove(Phase::Fingerprint));
    }

    #[test]
    fn test_key_enrollment_and_battery() {
        let key = AuthorizedKey::new("KEY-001", "Master Key A", 15).unwrap();
        assert!(!key.has_full_enrollment());
        assert!(key.is_battery_low());

        let key = key.fully_enrolled();
        assert!(key.has_full_enrollment());
        assert!(key.is_enrolled(BiometricKind::Vein));
    }

    #[test]
    fn test_key_validation() {
        assert!(AuthorizedKey::new("", "name", 50).is_err());
        assert!(AuthorizedKey::new("KEY-002", "  ", 50).is_err());
        assert!(matches!(
            AuthorizedKey::new("KEY-002", "name", 101),
            Err(Error::InvalidBatteryLevel(101))
        ));
    }

    #[test]
    fn test_device_validation() {
        assert!(RegisteredDevice::new(" ", "Beacon", DeviceKind::Bluetooth).is_err());
        assert!(matches!(
            RegisteredDevice::new("PHONE-1", "", DeviceKind::Phone),
            Err(Error::InvalidId(_))
        ));
        assert!(RegisteredDevice::new("PHONE-1", "Pixel", DeviceKind::Phone).is_ok());
    }

    #[test]
    fn test_audit_line_format() {
        let event = SecurityEvent::failure(Phase::Vein, "denied", ConnectionMode::Hardware);
        let line = event.audit_line();
        assert!(line.contains("Phase: VEIN"));
        assert!(line.ends_with("Status: FAILURE, Details: denied"));
    }

    #[test]
    fn test_new_lock_state_is_locked_and_idle() {
        let state = LockState::new(ConnectionMode::Hardware);
        assert!(state.is_locked);
        assert_eq!(state.current_phase, Phase::Idle);
        assert!(state.verified_phases.is_empty());
        assert!(state.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_violation_detected() {
        let mut state = LockState::default();
        state.is_locked = false;
        assert!(state.check_invariants().is_err());

        state.current_phase = Phase::Unlocked;
        assert!(state.check_invariants().is_err());

        for phase in Phase::REQUIRED {
            state.verified_phases.insert(phase).unwrap();
        }
        assert!(state.check_invariants().is_ok());
        assert!(state.is_unlocked());
    }

    #[test]
    fn test_lock_state_serialization() {
        let mut state = LockState::default();
        state.verified_phases.insert(Phase::Proximity).unwrap();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"verified_phases\":[\"proximity\"]"));

        let back: LockState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
