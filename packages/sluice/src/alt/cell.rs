// the record of which way a select went.
//
// shared between the selecting thread, the registrations it left on channels, and its timer. it
// is only ever claimed while holding the select's resource (which is connected to every channel
// it registered on), so claims from different parties are already serialized by the graph. the
// inner mutexes just make that sharing expressible in safe code.

use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;


// what completed a select.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Activation {
    // the branch with this index interacted with its channel, or saw it close.
    Branch(usize),
    // the after branch's delay elapsed.
    After,
    // the selecting thread was interrupted before anything else happened.
    Interrupted,
}

pub(crate) struct AltCell {
    active: Mutex<Option<Activation>>,
    wake: Mutex<Option<oneshot::Sender<()>>>,
}

impl AltCell {
    // construct unclaimed, along with the receiver the selecting thread blocks on.
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (send, recv) = oneshot::channel();
        let cell = AltCell {
            active: Mutex::new(None),
            wake: Mutex::new(Some(send)),
        };
        (Arc::new(cell), recv)
    }

    pub(crate) fn activation(&self) -> Option<Activation> {
        *self.active.lock().unwrap()
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.activation().is_some()
    }

    // claim the select for the given activation and wake the selecting thread, unless already
    // claimed. returns whether this call claimed it.
    pub(crate) fn claim(&self, activation: Activation) -> bool {
        {
            let mut active = self.active.lock().unwrap();
            if active.is_some() {
                return false;
            }
            *active = Some(activation);
        }
        if let Some(wake) = self.wake.lock().unwrap().take() {
            // the selecting thread may have stopped waiting, that's fine
            let _ = wake.send(());
        }
        true
    }
}
