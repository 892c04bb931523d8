use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::api::UnixSeconds;

/// Wall clock that a devnet can pin or move forward. Clones share the same
/// setting, so a ledger and a relay built from one clock agree on "now".
#[derive(Debug, Clone, Default)]
pub struct Clock {
    fixed: Arc<Mutex<Option<UnixSeconds>>>,
}
impl Clock {
    pub fn now(&self) -> UnixSeconds {
        match *self.fixed.lock().unwrap_or_else(|p| p.into_inner()) {
            Some(now) => now,
            None => Utc::now().timestamp(),
        }
    }
    pub fn set(&self, now: UnixSeconds) {
        *self.fixed.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
    }
    pub fn advance(&self, secs: i64) {
        let now = self.now();
        self.set(now + secs);
    }
}
