//! One-shot broadcast event used to fan out shutdown.
//!
//! A [`Barrier`] falls exactly once and stays fallen. Any number of tasks may
//! wait on it, and a barrier may forward its fall to other barriers. Forward
//! links are tracked in both directions so that a barrier which falls on its
//! own is dropped from the forward set of every barrier still pointing at it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type FallHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    fallen: bool,
    /// Barriers to fall when this one falls
    forwards: HashMap<u64, Arc<Barrier>>,
    /// Barriers whose forward set holds this one
    backwards: HashMap<u64, Weak<Barrier>>,
    hook: Option<FallHook>,
}

/// A one-shot, forwardable broadcast event.
pub struct Barrier {
    id: u64,
    state: Mutex<State>,
    fallen_tx: watch::Sender<bool>,
}

impl Barrier {
    /// Create a barrier that has not fallen.
    pub fn new() -> Self {
        let (fallen_tx, _) = watch::channel(false);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State::default()),
            fallen_tx,
        }
    }

    /// Install a hook run exactly once, by the first call to [`fall`](Self::fall),
    /// before any waiter is released.
    ///
    /// The hook runs while the barrier's state is locked, so it must not touch
    /// this barrier. Setting a hook on a fallen barrier has no effect.
    pub fn set_fall_hook(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if !state.fallen {
            state.hook = Some(Box::new(hook));
        }
    }

    /// Make the barrier fall. Only the first call has any effect.
    pub fn fall(&self) {
        let (forwards, backwards) = {
            let mut state = self.state.lock();
            if state.fallen {
                return;
            }
            if let Some(hook) = state.hook.take() {
                hook();
            }
            state.fallen = true;
            self.fallen_tx.send_replace(true);
            (
                std::mem::take(&mut state.forwards),
                std::mem::take(&mut state.backwards),
            )
        };

        for target in forwards.into_values() {
            target.fall();
        }

        for source in backwards.into_values().filter_map(|weak| weak.upgrade()) {
            source.state.lock().forwards.remove(&self.id);
        }
    }

    /// Make `target` fall whenever this barrier falls.
    ///
    /// If this barrier has already fallen, `target` falls before this returns.
    pub fn forward(self: &Arc<Self>, target: &Arc<Barrier>) {
        let already_fallen = {
            let mut state = self.state.lock();
            if !state.fallen {
                state.forwards.insert(target.id, Arc::clone(target));
            }
            state.fallen
        };
        if already_fallen {
            target.fall();
            return;
        }

        let registered = {
            let mut target_state = target.state.lock();
            if !target_state.fallen {
                target_state
                    .backwards
                    .insert(self.id, Arc::downgrade(self));
            }
            !target_state.fallen
        };
        if !registered {
            // Target fell in between and will never clean up after us.
            self.state.lock().forwards.remove(&target.id);
        }
    }

    /// Whether the barrier has fallen.
    pub fn has_fallen(&self) -> bool {
        *self.fallen_tx.borrow()
    }

    /// A read-only handle that can be awaited until the barrier falls.
    pub fn watch(&self) -> Fallen {
        Fallen {
            rx: self.fallen_tx.subscribe(),
        }
    }

    /// Wait until the barrier falls.
    pub async fn wait(&self) {
        self.watch().wait().await
    }

    /// Number of barriers this one will forward its fall to.
    pub fn forward_count(&self) -> usize {
        self.state.lock().forwards.len()
    }

    /// Number of barriers currently forwarding to this one.
    pub fn backward_count(&self) -> usize {
        self.state.lock().backwards.len()
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("id", &self.id)
            .field("fallen", &self.has_fallen())
            .finish()
    }
}

/// Wait handle for a [`Barrier`].
#[derive(Debug, Clone)]
pub struct Fallen {
    rx: watch::Receiver<bool>,
}

impl Fallen {
    /// Whether the barrier has fallen.
    pub fn has_fallen(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the barrier falls. Returns immediately if it already has.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|fallen| *fallen).await.is_err() {
            // The barrier was dropped without falling; it never will.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_fall_is_idempotent() {
        let barrier = Arc::new(Barrier::new());
        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooks);
        barrier.set_fall_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        barrier.fall();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert!(barrier.has_fallen());
        barrier.fall();
        assert!(barrier.has_fallen());
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forward_propagates() {
        let a = Arc::new(Barrier::new());
        let b = Arc::new(Barrier::new());
        let c = Arc::new(Barrier::new());
        a.forward(&b);
        b.forward(&c);

        assert!(!c.has_fallen());
        a.fall();
        assert!(b.has_fallen());
        assert!(c.has_fallen());
        assert_eq!(a.forward_count(), 0);
    }

    #[test]
    fn test_forward_after_fall() {
        let a = Arc::new(Barrier::new());
        let b = Arc::new(Barrier::new());
        a.fall();
        a.forward(&b);
        assert!(b.has_fallen());
        assert_eq!(a.forward_count(), 0);
        assert_eq!(b.backward_count(), 0);
    }

    #[test]
    fn test_fallen_target_is_forgotten() {
        let teardown = Arc::new(Barrier::new());
        for _ in 0..1000 {
            let finished = Arc::new(Barrier::new());
            teardown.forward(&finished);
            assert_eq!(finished.backward_count(), 1);
            finished.fall();
        }
        assert_eq!(teardown.forward_count(), 0);
        assert!(!teardown.has_fallen());
    }

    #[test]
    fn test_forward_to_fallen_target() {
        let a = Arc::new(Barrier::new());
        let b = Arc::new(Barrier::new());
        b.fall();
        a.forward(&b);
        assert_eq!(a.forward_count(), 0);
        assert!(!a.has_fallen());
    }

    #[test]
    fn test_forward_cycle_does_not_deadlock() {
        let a = Arc::new(Barrier::new());
        let b = Arc::new(Barrier::new());
        a.forward(&b);
        b.forward(&a);
        b.fall();
        assert!(a.has_fallen());
        assert_eq!(a.forward_count(), 0);
        assert_eq!(b.forward_count(), 0);
    }

    #[test]
    fn test_hook_runs_before_waiters_see_fall() {
        let barrier = Arc::new(Barrier::new());
        let watch = barrier.watch();
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        let fallen_in_hook = watch.clone();
        barrier.set_fall_hook(move || {
            if !fallen_in_hook.has_fallen() {
                observed.fetch_add(1, Ordering::SeqCst);
            }
        });
        barrier.fall();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(watch.has_fallen());
    }

    #[tokio::test]
    async fn test_wait_handle() {
        let barrier = Arc::new(Barrier::new());
        let mut handle = barrier.watch();
        assert!(!handle.has_fallen());
        assert!(tokio::time::timeout(Duration::from_millis(20), handle.wait())
            .await
            .is_err());

        let waiters: Vec<_> = (0..32)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move { barrier.wait().await })
            })
            .collect();

        barrier.fall();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
        handle.wait().await;
        assert!(handle.has_fallen());
    }
}
