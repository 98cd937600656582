use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a listener should rebuild after a library mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshHint {
    Full,
    FilesRemoved,
}

type Callback<A> = Box<dyn FnMut(&A) + Send>;

struct Subscriber<A> {
    callback: Callback<A>,
    default_args: A,
}

type Shared<A> = Arc<ReentrantMutex<RefCell<Subscriber<A>>>>;

/// Single-subscriber change notification plus a dirty flag that views poll to
/// decide whether to reload.
///
/// The callback runs outside the slot lock, so it may call back into the hub.
/// A notification raised from inside the running callback is dropped.
pub struct ChangeHub<A: Clone> {
    subscriber: Mutex<Option<Shared<A>>>,
    changed: AtomicBool,
}

impl<A: Clone> Default for ChangeHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone> ChangeHub<A> {
    pub fn new() -> Self {
        Self {
            subscriber: Mutex::new(None),
            changed: AtomicBool::new(false),
        }
    }

    /// Replaces any previous subscriber.
    pub fn set_callback<F>(&self, callback: F, default_args: A)
    where
        F: FnMut(&A) + Send + 'static,
    {
        let subscriber = Subscriber {
            callback: Box::new(callback) as Callback<A>,
            default_args,
        };
        *self.subscriber.lock() = Some(Arc::new(ReentrantMutex::new(RefCell::new(subscriber))));
    }

    pub fn clear_callback(&self) {
        *self.subscriber.lock() = None;
    }

    pub fn has_callback(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    /// Explicit args win over the registered defaults. No-op without a
    /// subscriber.
    pub fn notify(&self, args: Option<A>) {
        let current = self.subscriber.lock().clone();
        let current = match current {
            Some(current) => current,
            None => return,
        };
        let running = current.lock();
        let mut subscriber = match running.try_borrow_mut() {
            Ok(subscriber) => subscriber,
            Err(_) => {
                debug!("Dropped a change notification raised inside its own callback");
                return;
            }
        };
        let args = args.unwrap_or_else(|| subscriber.default_args.clone());
        (subscriber.callback)(&args);
    }

    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Clears the dirty flag once a view has reacted to it.
    pub fn accept(&self) {
        self.changed.store(false, Ordering::SeqCst);
    }

    pub fn should_reload(&self, same_query: bool, force: bool) -> bool {
        force || !same_query || self.is_changed()
    }
}
