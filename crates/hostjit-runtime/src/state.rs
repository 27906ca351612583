//! Runtime initialization barrier and thread registration

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::entry::EntryTable;

static NEXT_STATE_ID: AtomicUsize = AtomicUsize::new(1);

type ThreadMap = DashMap<usize, ThreadId>;

/// Registrations of the current thread. Dropped on thread exit, which
/// removes the thread from every runtime that is still alive.
#[derive(Default)]
struct ThreadTokens {
    /// (state id, token, registry of that state)
    entries: Vec<(usize, usize, Weak<ThreadMap>)>,
}

impl Drop for ThreadTokens {
    fn drop(&mut self) {
        for (_, token, threads) in self.entries.drain(..) {
            if let Some(threads) = threads.upgrade() {
                threads.remove(&token);
            }
        }
    }
}

thread_local! {
    static THREAD_TOKENS: RefCell<ThreadTokens> = RefCell::new(ThreadTokens::default());
}

/// State of one host runtime.
///
/// Compiled code must not re-enter the runtime before [`start`](Self::start)
/// has been called. [`wait_ready`](Self::wait_ready) blocks until then and
/// hands out the scheduling context of the calling thread.
pub struct RuntimeState {
    id: usize,
    started: Mutex<bool>,
    ready: Condvar,
    next_token: AtomicUsize,
    threads: Arc<ThreadMap>,
    entries: EntryTable,
    calls_served: AtomicU64,
}

/// Snapshot of runtime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Host function calls completed through the runtime
    pub calls_served: u64,
    /// Live threads holding a scheduling context
    pub registered_threads: usize,
    /// Registered host function entries
    pub entries: usize,
}

impl RuntimeState {
    /// Create a runtime that has not started yet
    pub fn new() -> Self {
        RuntimeState {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
            started: Mutex::new(false),
            ready: Condvar::new(),
            next_token: AtomicUsize::new(1),
            threads: Arc::new(DashMap::new()),
            entries: EntryTable::new(),
            calls_served: AtomicU64::new(0),
        }
    }

    /// Mark the runtime initialized and wake every waiter. Idempotent.
    pub fn start(&self) {
        let mut started = self.started.lock();
        if !*started {
            *started = true;
            tracing::debug!(target: "hostjit::runtime", "runtime {} started", self.id);
            self.ready.notify_all();
        }
    }

    /// Whether [`start`](Self::start) has been called
    pub fn is_started(&self) -> bool {
        *self.started.lock()
    }

    /// Block until the runtime has started, then return the calling thread's
    /// scheduling context. The context is non-zero and the same on every call
    /// from one thread.
    pub fn wait_ready(&self) -> usize {
        {
            let mut started = self.started.lock();
            while !*started {
                self.ready.wait(&mut started);
            }
        }
        self.register_current_thread()
    }

    /// Like [`wait_ready`](Self::wait_ready) with an upper bound on the wait
    pub fn wait_ready_timeout(&self, timeout: Duration) -> Option<usize> {
        {
            let mut started = self.started.lock();
            if !*started {
                let _ = self.ready.wait_while_for(&mut started, |s| !*s, timeout);
                if !*started {
                    return None;
                }
            }
        }
        Some(self.register_current_thread())
    }

    fn register_current_thread(&self) -> usize {
        THREAD_TOKENS.with(|tokens| {
            let mut tokens = tokens.borrow_mut();
            if let Some(&(_, token, _)) = tokens.entries.iter().find(|(state, _, _)| *state == self.id) {
                return token;
            }
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            let thread = std::thread::current().id();
            self.threads.insert(token, thread);
            tokens.entries.push((self.id, token, Arc::downgrade(&self.threads)));
            tracing::trace!(
                target: "hostjit::runtime",
                "registered thread {:?} with context {:#x}",
                thread,
                token
            );
            token
        })
    }

    /// Whether `ctxt` was handed out by this runtime to the calling thread
    pub fn is_current_context(&self, ctxt: usize) -> bool {
        self.threads
            .get(&ctxt)
            .map(|thread| *thread == std::thread::current().id())
            .unwrap_or(false)
    }

    /// Registered host functions
    pub fn entries(&self) -> &EntryTable {
        &self.entries
    }

    pub(crate) fn record_call(&self) {
        self.calls_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            calls_served: self.calls_served.load(Ordering::Relaxed),
            registered_threads: self.threads.len(),
            entries: self.entries.len(),
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

static RUNTIME: Lazy<RuntimeState> = Lazy::new(RuntimeState::new);

/// The process runtime served by the exported entry points
pub fn runtime() -> &'static RuntimeState {
    &RUNTIME
}

/// Start the process runtime
pub fn start() {
    RUNTIME.start();
}
