// pending registrations on a channel.
//
// each registration carries the promise half of a oneshot pair. the matching engine fulfills it
// while the channel's resource is held, which never blocks; the party that registered waits on the
// other half, with the resource released.

use super::error::ClosedError;
use crate::alt::cell::{Activation, AltCell};
use std::{fmt, sync::Arc};
use tokio::sync::oneshot;


// how to deliver the outcome of a registration.
pub(crate) enum Notify<V> {
    // a caller blocked (or polling) on the other half of the oneshot.
    Direct(oneshot::Sender<V>),
    // one branch of a select. delivering to it also claims the select.
    Branch {
        cell: Arc<AltCell>,
        index: usize,
        slot: oneshot::Sender<V>,
    },
}

impl<V> Notify<V> {
    // whether delivering to this would still mean anything. a branch of a select that already
    // went another way is dead, and matching must skip it.
    pub(crate) fn is_live(&self) -> bool {
        match self {
            Notify::Direct(slot) => !slot.is_closed(),
            Notify::Branch { cell, .. } => !cell.is_claimed(),
        }
    }

    // deliver. a no-op if not live.
    pub(crate) fn deliver(self, value: V) {
        match self {
            Notify::Direct(slot) => {
                let _ = slot.send(value);
            }
            Notify::Branch { cell, index, slot } => {
                if cell.is_claimed() {
                    return;
                }
                let _ = slot.send(value);
                cell.claim(Activation::Branch(index));
            }
        }
    }
}

impl<V> fmt::Debug for Notify<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Notify::Direct(_) => f.write_str("Direct"),
            Notify::Branch { index, .. } => f.debug_struct("Branch").field("index", index).finish(),
        }
    }
}

// a reader waiting for a message.
#[derive(Debug)]
pub(crate) struct WaitingReader<T>(pub(crate) Notify<Result<T, ClosedError>>);

impl<T> WaitingReader<T> {
    pub(crate) fn is_live(&self) -> bool {
        self.0.is_live()
    }

    // hand over a writer's message.
    pub(crate) fn writer_arrived(self, msg: T) {
        self.0.deliver(Ok(msg));
    }

    pub(crate) fn closed(self) {
        self.0.deliver(Err(ClosedError));
    }
}

// a writer waiting for a reader, or for room in a buffered channel.
pub(crate) struct WaitingWriter<T> {
    msg: T,
    notify: Notify<Result<(), ClosedError>>,
}

impl<T> WaitingWriter<T> {
    pub(crate) fn new(msg: T, notify: Notify<Result<(), ClosedError>>) -> Self {
        WaitingWriter { msg, notify }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.notify.is_live()
    }

    // tell the writer its write completed, and give up the message for the buffer to hold until
    // a reader arrives.
    pub(crate) fn accept_into_buffer(self) -> T {
        self.notify.deliver(Ok(()));
        self.msg
    }

    // split into the message and the writer's side of the registration, so the engine can hand
    // the message to a reader before telling the writer.
    pub(crate) fn split(self) -> (T, PendingWrite) {
        (self.msg, PendingWrite(self.notify))
    }
}

// the writer's side of a registration whose message was already taken out.
pub(crate) struct PendingWrite(Notify<Result<(), ClosedError>>);

impl PendingWrite {
    // a reader took the message.
    pub(crate) fn reader_arrived(self) {
        self.0.deliver(Ok(()));
    }

    // the channel closed before a reader took the message.
    pub(crate) fn closed(self) {
        self.0.deliver(Err(ClosedError));
    }
}

impl<T> fmt::Debug for WaitingWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitingWriter").field("notify", &self.notify).finish_non_exhaustive()
    }
}
