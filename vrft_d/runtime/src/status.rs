use api::{Capabilities, ModuleState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// One of the two global capability slots.
#[derive(Debug, Default)]
pub struct CapabilitySlot {
    state: AtomicU8,
    claimant: RwLock<Option<String>>,
}

impl CapabilitySlot {
    pub fn state(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A slot is offered to new modules only while nobody has claimed it.
    pub fn is_available(&self) -> bool {
        self.state() == ModuleState::Uninitialized
    }

    /// Name of the module that most recently claimed this slot.
    pub fn claimant(&self) -> Option<String> {
        self.claimant
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn claim(&self, module_name: &str) {
        *self.claimant.write().unwrap_or_else(PoisonError::into_inner) =
            Some(module_name.to_string());
        self.state.store(ModuleState::Active as u8, Ordering::Release);
    }

    fn reset(&self) {
        self.state
            .store(ModuleState::Uninitialized as u8, Ordering::Release);
        *self.claimant.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Global eye and expression status, owned by the supervisor and shared
/// read-only with everything else.
#[derive(Debug, Default)]
pub struct TrackingStatus {
    eye: CapabilitySlot,
    expression: CapabilitySlot,
}

impl TrackingStatus {
    pub fn eye(&self) -> &CapabilitySlot {
        &self.eye
    }

    pub fn expression(&self) -> &CapabilitySlot {
        &self.expression
    }

    pub fn eye_status(&self) -> ModuleState {
        self.eye.state()
    }

    pub fn expression_status(&self) -> ModuleState {
        self.expression.state()
    }

    /// Marks the slots in `won` Active on behalf of `module_name`. Slots the
    /// module did not win are left alone.
    pub(crate) fn claim(&self, won: Capabilities, module_name: &str) {
        if won.eye {
            self.eye.claim(module_name);
        }
        if won.expression {
            self.expression.claim(module_name);
        }
    }

    pub(crate) fn reset(&self) {
        self.eye.reset();
        self.expression.reset();
    }
}

/// What the outside world sees of one loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModuleInfo {
    pub id: u64,
    pub name: String,
    pub active: bool,
    pub status: ModuleState,
    pub using_eye: bool,
    pub using_expression: bool,
    /// Entries such as "Initializing Modules..." that stand in for real
    /// modules while none are running.
    pub placeholder: bool,
}

impl LoadedModuleInfo {
    pub fn placeholder(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            active: false,
            status: ModuleState::Uninitialized,
            using_eye: false,
            using_expression: false,
            placeholder: true,
        }
    }
}

/// Observable collection of loaded modules. Mutated only through the
/// supervisor's dispatcher.
#[derive(Debug, Clone, Default)]
pub struct LoadedModules {
    inner: Arc<RwLock<Vec<LoadedModuleInfo>>>,
}

impl LoadedModules {
    pub fn snapshot(&self) -> Vec<LoadedModuleInfo> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Real modules only, placeholders filtered out.
    pub fn modules(&self) -> Vec<LoadedModuleInfo> {
        self.snapshot()
            .into_iter()
            .filter(|m| !m.placeholder)
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<LoadedModuleInfo> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| !m.placeholder && m.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Vec<LoadedModuleInfo>) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_only_touches_won_slots() {
        let status = TrackingStatus::default();
        status.claim(Capabilities::EXPRESSION, "lip");

        assert_eq!(status.eye_status(), ModuleState::Uninitialized);
        assert!(status.eye().claimant().is_none());
        assert_eq!(status.expression_status(), ModuleState::Active);
        assert_eq!(status.expression().claimant().as_deref(), Some("lip"));
    }

    #[test]
    fn later_claim_takes_ownership() {
        let status = TrackingStatus::default();
        status.claim(Capabilities::BOTH, "first");
        status.claim(Capabilities::EYE, "second");

        assert_eq!(status.eye().claimant().as_deref(), Some("second"));
        assert_eq!(status.expression().claimant().as_deref(), Some("first"));
    }

    #[test]
    fn reset_clears_state_and_owner() {
        let status = TrackingStatus::default();
        status.claim(Capabilities::BOTH, "m");
        status.reset();

        assert!(status.eye().is_available());
        assert!(status.expression().is_available());
        assert!(status.expression().claimant().is_none());
    }

    #[test]
    fn modules_hides_placeholders() {
        let loaded = LoadedModules::default();
        loaded.with_mut(|mods| {
            mods.push(LoadedModuleInfo::placeholder("Initializing Modules..."));
            mods.push(LoadedModuleInfo {
                id: 7,
                name: "real".into(),
                active: true,
                status: ModuleState::Active,
                using_eye: true,
                using_expression: false,
                placeholder: false,
            });
        });

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.modules().len(), 1);
        assert_eq!(loaded.get(7).map(|m| m.name), Some("real".to_string()));
        assert!(loaded.get(0).is_none());
    }
}
