//! A blocking single-value slot, one per waiting caller.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

#[derive(Debug)]
enum Slot<R> {
    Empty,
    Filled(R),
    Closed,
}

#[derive(Debug)]
struct Shared<R> {
    slot: Mutex<Slot<R>>,
    cvar: Condvar,
}

/// Sending half. Dropping it without sending closes the receptacle.
#[derive(Debug)]
pub struct Sender<R>(Arc<Shared<R>>);

/// Receiving half.
#[derive(Debug)]
pub struct Receiver<R>(Arc<Shared<R>>);

pub fn channel<R>() -> (Sender<R>, Receiver<R>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Empty),
        cvar: Condvar::new(),
    });
    (Sender(shared.clone()), Receiver(shared))
}

impl<R> Sender<R> {
    /// send never blocks, whether or not the receiver is still around.
    pub fn send(self, value: R) {
        *self.0.slot.lock() = Slot::Filled(value);
    }
}

impl<R> Drop for Sender<R> {
    fn drop(&mut self) {
        let mut slot = self.0.slot.lock();
        if let Slot::Empty = *slot {
            *slot = Slot::Closed;
        }
        drop(slot);
        self.0.cvar.notify_one();
    }
}

impl<R> Receiver<R> {
    /// recv blocks until a value is sent, or returns None once the sender
    /// is gone without sending.
    pub fn recv(self) -> Option<R> {
        let mut slot = self.0.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Closed) {
                Slot::Empty => {
                    *slot = Slot::Empty;
                    self.0.cvar.wait(&mut slot);
                }
                Slot::Filled(value) => return Some(value),
                Slot::Closed => return None,
            }
        }
    }
}
