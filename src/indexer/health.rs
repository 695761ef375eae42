//! Read-only health view for the external exposition layer.

use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Derived status composed from lease, cursor, and loop timing state.
/// Recomputed every iteration; never persisted.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HealthSnapshot {
    pub instance_id: String,
    pub cursor: i64,
    pub lease_holder: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub lease_held: bool,
    pub last_iteration_at: Option<i64>,
    pub last_error: Option<String>,
    pub backlog_secs: i64,
    pub backlog_alert_active: bool,
}

/// Cheap cloneable handle the HTTP layer can poll while the loop runs.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Mutex<HealthSnapshot>>,
}

impl HealthMonitor {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HealthSnapshot {
                instance_id: instance_id.into(),
                ..HealthSnapshot::default()
            })),
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut HealthSnapshot)) {
        let mut snapshot = self.inner.lock().unwrap();
        apply(&mut snapshot);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.lock().unwrap().clone()
    }
}
