use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_timer::Delay;

/// Result of a keyed debounce wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DebounceOutcome {
    /// The delay elapsed with no newer call sharing the token.
    Elapsed,
    /// A newer call with the same token arrived during the wait.
    Superseded,
}

/// Keyed delay primitive coalescing rapid-fire triggers. Each token carries a
/// monotonic generation; a call bumps the generation and only the wait whose
/// generation is still current when the delay elapses wins. Tokens are scoped
/// per field instance and purpose (`{gid}-async`), so unrelated fields never
/// cancel each other.
///
/// The registry is an explicit value owned by whichever component composes
/// the engine; cloning shares the underlying slots.
#[derive(Clone, Debug, Default)]
pub struct Debouncer {
    generations: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `Elapsed` once `delay` has passed without a newer call
    /// sharing `token`; resolves `Superseded` otherwise.
    pub async fn debounce(&self, delay: Duration, token: &str) -> DebounceOutcome {
        let generation = self.begin(token);
        Delay::new(delay).await;
        if self.is_current(token, generation) {
            DebounceOutcome::Elapsed
        } else {
            DebounceOutcome::Superseded
        }
    }

    /// Bumps the token's generation and returns it. The generation doubles as
    /// a staleness guard: re-check with [`Debouncer::is_current`] after any
    /// suspension point whose result must not overwrite a newer pass.
    pub(crate) fn begin(&self, token: &str) -> u64 {
        let mut slots = self.slots();
        let generation = slots.get(token).copied().unwrap_or(0) + 1;
        slots.insert(token.to_string(), generation);
        generation
    }

    pub(crate) fn is_current(&self, token: &str, generation: u64) -> bool {
        self.slots().get(token).copied() == Some(generation)
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, u64>> {
        match self.generations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::thread;

    #[test]
    fn lone_wait_elapses() {
        let debouncer = Debouncer::new();
        let outcome = block_on(debouncer.debounce(Duration::from_millis(5), "a-async"));
        assert_eq!(outcome, DebounceOutcome::Elapsed);
    }

    #[test]
    fn newer_call_supersedes_the_pending_wait() {
        let debouncer = Debouncer::new();
        let first = {
            let debouncer = debouncer.clone();
            thread::spawn(move || block_on(debouncer.debounce(Duration::from_millis(40), "a-async")))
        };
        thread::sleep(Duration::from_millis(10));
        let second = {
            let debouncer = debouncer.clone();
            thread::spawn(move || block_on(debouncer.debounce(Duration::from_millis(40), "a-async")))
        };

        assert_eq!(first.join().unwrap(), DebounceOutcome::Superseded);
        assert_eq!(second.join().unwrap(), DebounceOutcome::Elapsed);
    }

    #[test]
    fn distinct_tokens_do_not_cancel_each_other() {
        let debouncer = Debouncer::new();
        let first = {
            let debouncer = debouncer.clone();
            thread::spawn(move || block_on(debouncer.debounce(Duration::from_millis(20), "a-async")))
        };
        let second = {
            let debouncer = debouncer.clone();
            thread::spawn(move || block_on(debouncer.debounce(Duration::from_millis(20), "b-async")))
        };

        assert_eq!(first.join().unwrap(), DebounceOutcome::Elapsed);
        assert_eq!(second.join().unwrap(), DebounceOutcome::Elapsed);
    }

    #[test]
    fn generation_guard_reports_staleness() {
        let debouncer = Debouncer::new();
        let generation = debouncer.begin("a-async");
        assert!(debouncer.is_current("a-async", generation));
        debouncer.begin("a-async");
        assert!(!debouncer.is_current("a-async", generation));
    }
}
