//! Ordered startup and shutdown hooks.
//!
//! Hooks carry an integer level. `start` runs them from the lowest level up,
//! `stop` from the highest down. Each hook's start and stop run at most once
//! for the life of the `Lifecycle`; a hook that never started is not
//! stopped.

use std::fmt;
use std::sync::OnceLock;

pub type HookFn = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A start hook that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleError {
    pub hook: String,
    pub message: String,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "startup hook '{}' failed: {}", self.hook, self.message)
    }
}

impl std::error::Error for LifecycleError {}

struct Hook {
    name: String,
    level: i32,
    start: HookFn,
    stop: Option<HookFn>,
    started: OnceLock<()>,
    stopped: OnceLock<()>,
}

#[derive(Default)]
pub struct Lifecycle {
    /// Sorted by level; equal levels keep insertion order.
    hooks: Vec<Hook>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook with a start action and an optional stop action.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        level: i32,
        start: impl Fn() -> Result<(), String> + Send + Sync + 'static,
        stop: Option<HookFn>,
    ) {
        let hook = Hook {
            name: name.into(),
            level,
            start: Box::new(start),
            stop,
            started: OnceLock::new(),
            stopped: OnceLock::new(),
        };
        let at = self.hooks.partition_point(|h| h.level <= level);
        self.hooks.insert(at, hook);
    }

    /// Run the start hooks that have not run yet, lowest level first.
    ///
    /// # Errors
    ///
    /// Stops at the first failing hook and returns its name.
    pub fn start(&self) -> Result<(), LifecycleError> {
        for hook in &self.hooks {
            if hook.started.get().is_some() {
                continue;
            }
            tracing::debug!("start hook {} (level {})", hook.name, hook.level);
            (hook.start)().map_err(|message| LifecycleError {
                hook: hook.name.clone(),
                message,
            })?;
            let _ = hook.started.set(());
        }
        Ok(())
    }

    /// Run the stop hooks of started hooks, highest level first. Failures
    /// are logged and do not stop the sequence.
    pub fn stop(&self) {
        for hook in self.hooks.iter().rev() {
            if hook.started.get().is_none() || hook.stopped.set(()).is_err() {
                continue;
            }
            if let Some(stop) = &hook.stop {
                tracing::debug!("stop hook {} (level {})", hook.name, hook.level);
                if let Err(e) = stop() {
                    tracing::warn!("stop hook {} failed: {e}", hook.name);
                }
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
