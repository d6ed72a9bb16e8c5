//! Process-wide engine runtime reference counting.
//!
//! Platforms that need global initialisation get exactly one `startup()`
//! when the first session opens and one `shutdown()` when the last guard is
//! dropped, no matter how many drivers come and go in between.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{EnginePlatform, EngineResult};

lazy_static! {
    static ref RUNTIMES: Mutex<HashMap<String, usize>> = Mutex::new(HashMap::new());
}

/// Holds one reference on a platform's runtime.
pub struct RuntimeGuard {
    platform: Arc<dyn EnginePlatform>,
}

impl RuntimeGuard {
    /// Takes a reference, starting the runtime if this is the first one.
    pub fn acquire(platform: Arc<dyn EnginePlatform>) -> EngineResult<Self> {
        let mut runtimes = RUNTIMES.lock();
        let count = runtimes.entry(platform.name().to_string()).or_insert(0);
        if *count == 0 {
            log::info!("starting engine runtime {}", platform.name());
            platform.startup()?;
        }
        *count += 1;
        Ok(Self { platform })
    }

    pub fn platform(&self) -> &Arc<dyn EnginePlatform> {
        &self.platform
    }
}

/// Current number of guards held for `name`.
pub fn active_sessions(name: &str) -> usize {
    RUNTIMES.lock().get(name).copied().unwrap_or(0)
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        let mut runtimes = RUNTIMES.lock();
        let name = self.platform.name();
        let last = match runtimes.get_mut(name) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if last {
            runtimes.remove(name);
            log::info!("shutting down engine runtime {}", name);
            if let Err(e) = self.platform.shutdown() {
                log::warn!("runtime shutdown for {} failed: {}", name, e);
            }
        }
    }
}

impl std::fmt::Debug for RuntimeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeGuard")
            .field("platform", &self.platform.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakePlatform;

    #[test]
    fn test_startup_and_shutdown_counted() {
        let platform = Arc::new(FakePlatform::named("runtime-count-test"));
        let first = RuntimeGuard::acquire(platform.clone()).unwrap();
        let second = RuntimeGuard::acquire(platform.clone()).unwrap();
        assert_eq!(platform.startups(), 1);
        assert_eq!(active_sessions("runtime-count-test"), 2);

        drop(first);
        assert_eq!(platform.shutdowns(), 0);
        drop(second);
        assert_eq!(platform.shutdowns(), 1);
        assert_eq!(active_sessions("runtime-count-test"), 0);

        let _again = RuntimeGuard::acquire(platform.clone()).unwrap();
        assert_eq!(platform.startups(), 2);
    }
}
