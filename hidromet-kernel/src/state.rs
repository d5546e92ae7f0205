//! État partagé entre handlers : slot du cache débitmètre, config du kernel.

use parking_lot::Mutex;
use std::sync::Arc;

/// Verrou court, jamais tenu à travers un `.await`
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
