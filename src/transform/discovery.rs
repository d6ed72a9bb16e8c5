//! Engine discovery.
//!
//! Candidates are tried in the order the platform returns them. Every
//! activator is shut down when discovery returns, whether or not it was
//! activated or accepted.

use crate::engine::{keys, CapabilityClass, Engine, EngineActivator, EnginePlatform};
use crate::error::{BridgeError, Result};

/// The accepted engine and the name its activator advertised.
pub struct Discovered {
    pub engine: Box<dyn Engine>,
    pub name: String,
    /// Position of the candidate in platform order.
    pub index: usize,
}

impl std::fmt::Debug for Discovered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovered")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish()
    }
}

/// Shuts every activator down when dropped.
struct Activators(Vec<Box<dyn EngineActivator>>);

impl Drop for Activators {
    fn drop(&mut self) {
        for activator in self.0.iter_mut() {
            if let Err(e) = activator.shutdown() {
                log::warn!("activator shutdown failed: {}", e);
            }
        }
    }
}

/// Finds and activates the first acceptable engine for `class`.
///
/// With `activate_index` only that candidate is tried. Engines that only
/// run asynchronously are skipped before `accept` sees them.
pub fn discover<F>(
    platform: &dyn EnginePlatform,
    class: &CapabilityClass,
    activate_index: Option<usize>,
    mut accept: F,
) -> Result<Discovered>
where
    F: FnMut(&mut dyn Engine) -> bool,
{
    let list = platform.enumerate(class).map_err(|e| {
        BridgeError::EngineNotFound(format!("{}: enumeration failed for {}: {}", platform.name(), class, e))
    })?;
    if list.is_empty() {
        return Err(BridgeError::EngineNotFound(format!(
            "{}: no candidates for {}",
            platform.name(),
            class
        )));
    }
    let mut activators = Activators(list);
    log::debug!("{} candidate engines for {}", activators.0.len(), class);

    for (index, activator) in activators.0.iter_mut().enumerate() {
        if activate_index.is_some_and(|wanted| wanted != index) {
            continue;
        }
        let name = activator
            .attributes()
            .string(keys::FRIENDLY_NAME)
            .unwrap_or("<unnamed>")
            .to_string();

        let mut engine = match activator.activate() {
            Ok(engine) => engine,
            Err(e) => {
                log::warn!("activating '{}' failed: {}", name, e);
                continue;
            }
        };
        if engine.attributes().get_u32_or(keys::TRANSFORM_ASYNC, 0) != 0 {
            log::debug!("skipping asynchronous engine '{}'", name);
            let _ = engine.shutdown();
            continue;
        }
        if !accept(engine.as_mut()) {
            log::debug!("engine '{}' rejected", name);
            let _ = engine.shutdown();
            continue;
        }
        log::info!("using engine '{}' (candidate {})", name, index);
        return Ok(Discovered {
            engine,
            name,
            index,
        });
    }

    Err(BridgeError::EngineNotFound(format!(
        "no candidate for {} was accepted",
        class
    )))
}
