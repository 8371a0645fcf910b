//! Process-wide orchestrator slot for code that cannot thread a handle
//! through (framework hooks, global error handlers).
//!
//! Explicit construction via [`SyncOrchestrator::new`] remains the primary
//! API; the registry only stores a clone.

use parking_lot::Mutex;

use profile_sync_core::SyncConfig;

use crate::error::SyncError;
use crate::orchestrator::{SyncDependencies, SyncOrchestrator};

static GLOBAL: Mutex<Option<SyncOrchestrator>> = parking_lot::const_mutex(None);

/// Build and register the process orchestrator.
pub fn init(config: SyncConfig, deps: SyncDependencies) -> Result<SyncOrchestrator, SyncError> {
    let mut slot = GLOBAL.lock();
    if slot.is_some() {
        return Err(SyncError::AlreadyInitialized);
    }
    let orchestrator = SyncOrchestrator::new(config, deps)?;
    *slot = Some(orchestrator.clone());
    Ok(orchestrator)
}

/// Register an orchestrator built elsewhere.
pub fn install(orchestrator: SyncOrchestrator) -> Result<(), SyncError> {
    let mut slot = GLOBAL.lock();
    if slot.is_some() {
        return Err(SyncError::AlreadyInitialized);
    }
    *slot = Some(orchestrator);
    Ok(())
}

pub fn get() -> Option<SyncOrchestrator> {
    GLOBAL.lock().clone()
}

/// Dispose and unregister the process orchestrator. Returns `false` if none
/// was registered.
pub fn dispose() -> bool {
    let taken = GLOBAL.lock().take();
    match taken {
        Some(orchestrator) => {
            orchestrator.dispose();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use profile_sync_core::ManualScheduler;

    // One test owns the global slot; parallel tests would race on it.
    #[test]
    fn lifecycle() {
        let deps = || SyncDependencies::new(Arc::new(ManualScheduler::new()), None);

        assert!(get().is_none());
        assert!(!dispose());

        let orchestrator = init(SyncConfig::default(), deps()).unwrap();
        assert!(matches!(
            init(SyncConfig::default(), deps()),
            Err(SyncError::AlreadyInitialized)
        ));
        assert!(matches!(
            install(orchestrator.clone()),
            Err(SyncError::AlreadyInitialized)
        ));
        assert!(get().is_some());

        assert!(dispose());
        assert!(orchestrator.is_disposed());
        assert!(get().is_none());

        let other = SyncOrchestrator::new(SyncConfig::default(), deps()).unwrap();
        install(other).unwrap();
        assert!(dispose());
    }
}
