//! Lock state machine.
//!
//! A device is either `Active` or `Locked`. The coarse `is_locked` flag tells
//! the agent whether to show the lock screen; the five feature flags drive the
//! fine-grained restrictions. Locking and unlocking move all five flags
//! together, while [`Device::set_feature_lock`] toggles a single flag and
//! leaves `is_locked` alone, so the two can legitimately diverge.

use serde::{Deserialize, Serialize};

use crate::models::{Device, Feature, FeatureLocks, FeatureLocksPatch};

/// Coarse lock state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Active,
    Locked,
}

impl LockState {
    pub fn from_flag(is_locked: bool) -> Self {
        if is_locked {
            LockState::Locked
        } else {
            LockState::Active
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked)
    }

    /// Feature restrictions that accompany this state after a transition.
    pub fn feature_locks(&self) -> FeatureLocks {
        FeatureLocks::all(self.is_locked())
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockState::Active => write!(f, "active"),
            LockState::Locked => write!(f, "locked"),
        }
    }
}

impl FeatureLocks {
    /// Every feature set to `locked`.
    pub fn all(locked: bool) -> Self {
        Self {
            camera: locked,
            network: locked,
            wifi: locked,
            power_off: locked,
            reset: locked,
        }
    }

    pub fn get(&self, feature: Feature) -> bool {
        match feature {
            Feature::Camera => self.camera,
            Feature::Network => self.network,
            Feature::Wifi => self.wifi,
            Feature::PowerOff => self.power_off,
            Feature::Reset => self.reset,
        }
    }

    pub fn set(&mut self, feature: Feature, locked: bool) {
        match feature {
            Feature::Camera => self.camera = locked,
            Feature::Network => self.network = locked,
            Feature::Wifi => self.wifi = locked,
            Feature::PowerOff => self.power_off = locked,
            Feature::Reset => self.reset = locked,
        }
    }

    pub fn apply_patch(&mut self, patch: &FeatureLocksPatch) {
        let updates = [
            (Feature::Camera, patch.camera),
            (Feature::Network, patch.network),
            (Feature::Wifi, patch.wifi),
            (Feature::PowerOff, patch.power_off),
            (Feature::Reset, patch.reset),
        ];
        for (feature, value) in updates {
            if let Some(locked) = value {
                self.set(feature, locked);
            }
        }
    }

    pub fn is_fully_restricted(&self) -> bool {
        Feature::ALL.iter().all(|f| self.get(*f))
    }

    pub fn is_fully_released(&self) -> bool {
        Feature::ALL.iter().all(|f| !self.get(*f))
    }

    /// Features currently restricted, in declaration order.
    pub fn restricted(&self) -> Vec<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f))
            .collect()
    }
}

impl Device {
    pub fn lock_state(&self) -> LockState {
        LockState::from_flag(self.is_locked)
    }

    /// Moves the device into `state`, setting all feature flags to match.
    /// Applying the current state again is a no-op.
    pub fn apply_lock_state(&mut self, state: LockState) {
        self.is_locked = state.is_locked();
        self.feature_locks = state.feature_locks();
    }

    pub fn lock(&mut self) {
        self.apply_lock_state(LockState::Locked);
    }

    pub fn unlock(&mut self) {
        self.apply_lock_state(LockState::Active);
    }

    /// Toggles one feature without touching `is_locked`.
    pub fn set_feature_lock(&mut self, feature: Feature, locked: bool) {
        self.feature_locks.set(feature, locked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::sample_device;

    #[test]
    fn test_lock_sets_all_restrictions() {
        let mut device = sample_device("D1");
        device.lock();

        assert!(device.is_locked);
        assert!(device.feature_locks.is_fully_restricted());
        assert_eq!(device.lock_state(), LockState::Locked);
    }

    #[test]
    fn test_unlock_clears_all_restrictions() {
        let mut device = sample_device("D1");
        device.lock();
        device.unlock();

        assert!(!device.is_locked);
        assert!(device.feature_locks.is_fully_released());
        assert_eq!(device.lock_state(), LockState::Active);
    }

    #[test]
    fn test_lock_is_idempotent() {
        let mut once = sample_device("D1");
        let mut twice = once.clone();

        once.lock();
        twice.lock();
        twice.lock();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_unlock_clears_granular_restrictions() {
        let mut device = sample_device("D1");
        device.set_feature_lock(Feature::Camera, true);
        device.unlock();
        assert!(device.feature_locks.is_fully_released());
    }

    #[test]
    fn test_set_feature_lock_leaves_is_locked_alone() {
        let mut device = sample_device("D1");
        device.set_feature_lock(Feature::Camera, true);

        assert!(!device.is_locked);
        assert!(device.feature_locks.camera);
        assert_eq!(device.feature_locks.restricted(), vec![Feature::Camera]);

        device.lock();
        device.set_feature_lock(Feature::Wifi, false);
        assert!(device.is_locked);
        assert!(!device.feature_locks.wifi);
        assert!(!device.feature_locks.is_fully_restricted());
    }

    #[test]
    fn test_feature_locks_get_set() {
        let mut locks = FeatureLocks::default();
        for feature in Feature::ALL {
            assert!(!locks.get(feature));
            locks.set(feature, true);
            assert!(locks.get(feature));
        }
        assert_eq!(locks, FeatureLocks::all(true));
    }

    #[test]
    fn test_apply_patch_only_touches_present_flags() {
        let mut locks = FeatureLocks::all(true);
        locks.apply_patch(&FeatureLocksPatch {
            network: Some(false),
            ..Default::default()
        });

        assert!(locks.camera);
        assert!(!locks.network);
        assert!(locks.wifi);
        assert!(locks.power_off);
        assert!(locks.reset);
    }

    #[test]
    fn test_lock_state_from_flag() {
        assert_eq!(LockState::from_flag(true), LockState::Locked);
        assert_eq!(LockState::from_flag(false), LockState::Active);
        assert_eq!(LockState::Locked.to_string(), "locked");
    }
}
