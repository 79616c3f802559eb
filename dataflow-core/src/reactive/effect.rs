//! Observer Implementation
//!
//! An Observer is a terminal consumer: it runs a side effect with the
//! upstream's value whenever it is reconciled after a change.
//!
//! # How Observers Work
//!
//! 1. When created, the observer subscribes to its producer and starts
//!    decoherent, so the first reconcile always runs it.
//!
//! 2. When the producer decoheres it, the observer only marks itself dirty.
//!
//! 3. On the next reconcile it pulls the producer for that epoch and runs
//!    its callback once.
//!
//! # Differences from Transform
//!
//! - Transforms produce a value; observers do not.
//! - Observers have no subscribers, so nothing downstream ever pulls them.
//!   Whoever drives the graph reconciles observers directly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::subscriber::SubscriberId;
use super::{Consumer, Epoch, Producer};

struct ObserverState {
    dirty: bool,
    version: Option<Epoch>,
}

/// A side effect that runs when its producer changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = Source::new(0);
/// let log = Observer::new(count.clone(), |n| println!("count is {n}"));
///
/// count.set(1);
/// log.reconcile_input(clock.advance());   // prints "count is 1"
/// ```
pub struct Observer<T> {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn Producer<T>>,
    run: Box<dyn Fn(T) + Send + Sync>,
    state: Mutex<ObserverState>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl<T> Observer<T>
where
    T: Send + Sync + 'static,
{
    pub fn new<F>(upstream: Arc<dyn Producer<T>>, run: F) -> Arc<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let observer = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream: upstream.clone(),
            run: Box::new(run),
            state: Mutex::new(ObserverState {
                dirty: true,
                version: None,
            }),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });
        upstream.subscribe(observer.clone());
        observer
    }

    /// Unsubscribe and never run again.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.upstream.unsubscribe(self.subscriber_id);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }
}

impl<T> Consumer for Observer<T>
where
    T: Send + Sync + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn on_decohere(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.version = None;
    }

    fn reconcile_input(&self, epoch: Epoch) {
        if self.is_disposed() {
            return;
        }
        {
            let mut state = self.state.lock();
            if !state.dirty || state.version == Some(epoch) {
                return;
            }
            state.version = Some(epoch);
            state.dirty = false;
        }

        self.upstream.reconcile_output(epoch);
        (self.run)(self.upstream.current_value());
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T> std::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("subscriber_id", &self.subscriber_id)
            .field("run_count", &self.run_count.load(Ordering::SeqCst))
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
