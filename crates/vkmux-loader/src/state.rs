//! Process-wide loader state.
//!
//! The list of live sessions sits behind a single reentrant lock (layers
//! are allowed to call back into the loader while it holds the lock on
//! the same thread). The only way in is [`lock`].

use std::cell::RefCell;
use std::sync::OnceLock;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

#[derive(Default)]
struct LoaderState {
    sessions: Vec<usize>,
}

static STATE: OnceLock<ReentrantMutex<RefCell<LoaderState>>> = OnceLock::new();

fn state() -> &'static ReentrantMutex<RefCell<LoaderState>> {
    STATE.get_or_init(|| ReentrantMutex::new(RefCell::new(LoaderState::default())))
}

/// Held for the duration of every state-mutating loader operation.
pub struct LoaderLock {
    guard: ReentrantMutexGuard<'static, RefCell<LoaderState>>,
}

pub fn lock() -> LoaderLock {
    LoaderLock { guard: state().lock() }
}

impl LoaderLock {
    pub fn register_session(&self, addr: usize) {
        self.guard.borrow_mut().sessions.push(addr);
    }

    pub fn unregister_session(&self, addr: usize) -> bool {
        let mut state = self.guard.borrow_mut();
        match state.sessions.iter().position(|&s| s == addr) {
            Some(i) => {
                state.sessions.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn is_live_session(&self, addr: usize) -> bool {
        self.guard.borrow().sessions.contains(&addr)
    }

    pub fn live_sessions(&self) -> usize {
        self.guard.borrow().sessions.len()
    }

    pub fn sessions(&self) -> Vec<usize> {
        self.guard.borrow().sessions.clone()
    }
}
