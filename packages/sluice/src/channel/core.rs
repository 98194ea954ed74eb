// the matching engine shared by every channel variant. the exposed API is a convenience wrapper
// around this.
//
// all state lives behind the channel's resource: every method here takes the manipulator that
// proves the caller holds it. the inner mutex only exists so that a shared reference can mutate
// the state, and is never contended.
//
// messages the engine throws away (on close, or when pruning abandoned writers) are not dropped
// in place: a message may own the last handle to some other channel, whose drop acquires that
// channel's resource, which must not happen while holding a resource. they are stashed instead,
// and whoever holds the lock takes them and drops them after releasing.

use super::{
    error::{ArityError, ChannelError, ClosedError, End},
    policy::{Arity, Policy},
    ticket_queue::{Ticket, TicketQueue},
    waiter::{Notify, WaitingReader, WaitingWriter},
};
use crate::graph::{Manipulator, Resource, ResourceGraph};
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};


// channel shared state.
pub(crate) struct Core<T> {
    graph: ResourceGraph,
    resource: Resource,
    policy: Policy,
    lockable: Mutex<Lockable<T>>,
}

// channel lockable state.
struct Lockable<T> {
    // readers that registered and haven't been matched, in registration order.
    readers: TicketQueue<WaitingReader<T>>,
    // writers that registered and haven't been matched or accepted, in registration order.
    writers: TicketQueue<WaitingWriter<T>>,
    // messages the buffer accepted on behalf of writers that were already told their write
    // completed. these are the dummy writers: they logically queue ahead of every entry in
    // `writers`, so readers drain them first.
    buffer: VecDeque<T>,
    // once set, never unset. when set, both queues are empty.
    closed: bool,
    // messages thrown away but not yet dropped.
    discarded: Vec<T>,
}

impl<T> Core<T> {
    // construct open and empty, with a fresh resource in the graph.
    pub(crate) fn new(graph: &ResourceGraph, policy: Policy) -> Self {
        let resource = graph.new_resource();
        trace!(resource = resource.id(), ?policy, "creating channel");
        Core {
            graph: graph.clone(),
            resource,
            policy,
            lockable: Mutex::new(Lockable {
                readers: TicketQueue::new(),
                writers: TicketQueue::new(),
                buffer: VecDeque::new(),
                closed: false,
                discarded: Vec::new(),
            }),
        }
    }

    pub(crate) fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub(crate) fn resource(&self) -> &Resource {
        &self.resource
    }

    pub(crate) fn policy(&self) -> Policy {
        self.policy
    }

    // acquire the channel's resource on its own.
    pub(crate) fn acquire(&self) -> Manipulator {
        self.graph.acquire([&self.resource])
    }

    // lock the channel. the manipulator must hold the channel's resource.
    pub(crate) fn lock<'a>(&'a self, manip: &'a Manipulator) -> Lock<'a, T> {
        debug_assert!(manip.holds(&self.resource), "channel locked without holding its resource");
        Lock {
            core: self,
            lock: self.lockable.lock().unwrap(),
        }
    }
}

impl<T> Drop for Core<T> {
    fn drop(&mut self) {
        let mut manip = self.graph.acquire([&self.resource]);
        manip.remove_resource(&self.resource);
        manip.release();
    }
}

// lock on a channel.
pub(crate) struct Lock<'a, T> {
    core: &'a Core<T>,
    lock: MutexGuard<'a, Lockable<T>>,
}

impl<'a, T> Lock<'a, T> {
    pub(crate) fn is_closed(&self) -> bool {
        self.lock.closed
    }

    // number of queued readers, including ones that are abandoned but not yet pruned.
    pub(crate) fn pending_readers(&self) -> usize {
        self.lock.readers.len()
    }

    // number of queued writers, including dummy writers holding buffered messages.
    pub(crate) fn pending_writers(&self) -> usize {
        self.lock.writers.len() + self.lock.buffer.len()
    }

    // number of messages the buffer holds.
    pub(crate) fn buffered(&self) -> usize {
        self.lock.buffer.len()
    }

    // enqueue a reader. does not try to match it; call `update` for that.
    pub(crate) fn register_reader(
        &mut self,
        notify: Notify<Result<T, ClosedError>>,
    ) -> Result<Ticket, ChannelError> {
        if self.lock.closed {
            return Err(ClosedError.into());
        }
        if self.core.policy.readers == Arity::One
            && self.lock.readers.iter().any(WaitingReader::is_live)
        {
            return Err(ArityError { end: End::Read }.into());
        }
        let ticket = self.lock.readers.push(WaitingReader(notify));
        trace!(resource = self.core.resource.id(), "registered reader");
        Ok(ticket)
    }

    // enqueue a writer. does not try to match it; call `update` for that. on error, gives back the
    // message.
    pub(crate) fn register_writer(
        &mut self,
        msg: T,
        notify: Notify<Result<(), ClosedError>>,
    ) -> Result<Ticket, (ChannelError, T)> {
        if self.lock.closed {
            return Err((ClosedError.into(), msg));
        }
        if self.core.policy.writers == Arity::One
            && self.lock.writers.iter().any(WaitingWriter::is_live)
        {
            return Err((ArityError { end: End::Write }.into(), msg));
        }
        let ticket = self.lock.writers.push(WaitingWriter::new(msg, notify));
        trace!(resource = self.core.resource.id(), "registered writer");
        Ok(ticket)
    }

    // perform every match and buffer acceptance the queues currently allow. every step either
    // consumes a queue entry or stops, so this is linear in the entries it retires.
    pub(crate) fn update(&mut self) {
        let lockable = &mut *self.lock;

        loop {
            // abandoned registrations never match. buffered messages have no writer left to
            // abandon them.
            while lockable.readers.front().is_some_and(|r| !r.is_live()) {
                lockable.readers.pop_front();
            }
            if lockable.readers.is_empty() {
                break;
            }

            if let Some(msg) = lockable.buffer.pop_front() {
                let reader = lockable.readers.pop_front().unwrap();
                reader.writer_arrived(msg);
                trace!(resource = self.core.resource.id(), "matched reader with buffered message");
                continue;
            }

            while lockable.writers.front().is_some_and(|w| !w.is_live()) {
                if let Some(writer) = lockable.writers.pop_front() {
                    lockable.discarded.push(writer.split().0);
                }
            }
            let Some(writer) = lockable.writers.pop_front() else { break };
            let reader = lockable.readers.pop_front().unwrap();
            let (msg, pending) = writer.split();
            reader.writer_arrived(msg);
            pending.reader_arrived();
            trace!(resource = self.core.resource.id(), "matched reader with writer");
        }

        // move waiting writers into the buffer while it has room
        while self.core.policy.buffering.has_room(lockable.buffer.len()) {
            let Some(writer) = lockable.writers.pop_front() else { break };
            if !writer.is_live() {
                lockable.discarded.push(writer.split().0);
                continue;
            }
            lockable.buffer.push_back(writer.accept_into_buffer());
            trace!(
                resource = self.core.resource.id(),
                buffered = lockable.buffer.len(),
                "accepted message into buffer",
            );
        }
    }

    // take the messages the engine threw away. the caller must drop them only after releasing
    // the channel's resource.
    pub(crate) fn take_discarded(&mut self) -> Vec<T> {
        std::mem::take(&mut self.lock.discarded)
    }

    // remove a reader that must still be queued.
    pub(crate) fn deregister_reader(&mut self, ticket: Ticket) {
        self.lock.readers.remove(ticket);
    }

    // remove a reader if it is still queued, returning whether it was.
    pub(crate) fn try_deregister_reader(&mut self, ticket: Ticket) -> bool {
        self.lock.readers.try_remove(ticket).is_some()
    }

    // remove a writer that must still be queued and not yet accepted into the buffer, giving back
    // its message.
    pub(crate) fn deregister_writer(&mut self, ticket: Ticket) -> T {
        self.lock.writers.remove(ticket).split().0
    }

    // remove a writer if it is still queued and not accepted into the buffer, giving back its
    // message.
    pub(crate) fn try_deregister_writer(&mut self, ticket: Ticket) -> Option<T> {
        self.lock.writers.try_remove(ticket).map(|writer| writer.split().0)
    }

    // close the channel. every queued reader and writer is told so, and buffered messages are
    // dropped. closing twice does nothing.
    pub(crate) fn close(&mut self) {
        if self.lock.closed {
            return;
        }
        self.lock.closed = true;
        let lockable = &mut *self.lock;
        let readers = lockable.readers.len();
        let writers = lockable.writers.len();
        let buffered = lockable.buffer.len();
        lockable.discarded.extend(lockable.buffer.drain(..));
        for reader in lockable.readers.drain() {
            reader.closed();
        }
        for writer in lockable.writers.drain() {
            let (msg, pending) = writer.split();
            lockable.discarded.push(msg);
            pending.closed();
        }
        debug!(resource = self.core.resource.id(), readers, writers, buffered, "closed channel");
    }

    // close one end, which closes the channel or does nothing depending on its close policy.
    pub(crate) fn close_end(&mut self, end: End) {
        if self.core.policy.closing.closes_on(end) {
            self.close();
        } else {
            trace!(resource = self.core.resource.id(), %end, "half-close had no effect");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::policy::Buffering;
    use tokio::sync::oneshot;

    fn reader<T>(
        lock: &mut Lock<T>,
    ) -> (Result<Ticket, ChannelError>, oneshot::Receiver<Result<T, ClosedError>>) {
        let (send, recv) = oneshot::channel();
        (lock.register_reader(Notify::Direct(send)), recv)
    }

    fn writer<T>(
        lock: &mut Lock<T>,
        msg: T,
    ) -> (Ticket, oneshot::Receiver<Result<(), ClosedError>>) {
        let (send, recv) = oneshot::channel();
        let ticket = lock.register_writer(msg, Notify::Direct(send)).ok().unwrap();
        (ticket, recv)
    }

    #[test]
    fn unbuffered_match() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::ONE_ONE);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let (_, mut w) = writer(&mut lock, 1);
        lock.update();
        assert!(w.try_recv().is_err());
        assert_eq!(lock.pending_writers(), 1);

        let (r_ticket, mut r) = reader(&mut lock);
        r_ticket.unwrap();
        lock.update();
        assert_eq!(r.try_recv(), Ok(Ok(1)));
        assert_eq!(w.try_recv(), Ok(Ok(())));
        assert_eq!((lock.pending_readers(), lock.pending_writers()), (0, 0));
    }

    #[test]
    fn bounded_buffer_accepts_up_to_capacity() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::buffered(Arity::One, 2));
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let mut ws: Vec<_> = (0..3)
            .map(|i| {
                let w = writer(&mut lock, i);
                lock.update();
                w
            })
            .collect();
        assert_eq!(ws[0].1.try_recv(), Ok(Ok(())));
        assert_eq!(ws[1].1.try_recv(), Ok(Ok(())));
        assert!(ws[2].1.try_recv().is_err());
        assert_eq!(lock.buffered(), 2);

        // a read frees a slot, which the third writer takes
        let (_, mut r) = reader(&mut lock);
        lock.update();
        assert_eq!(r.try_recv(), Ok(Ok(0)));
        assert_eq!(ws[2].1.try_recv(), Ok(Ok(())));
        assert_eq!(lock.buffered(), 2);

        for expected in [1, 2] {
            let (_, mut r) = reader(&mut lock);
            lock.update();
            assert_eq!(r.try_recv(), Ok(Ok(expected)));
        }
        assert_eq!((lock.buffered(), lock.pending_writers()), (0, 0));
    }

    #[test]
    fn single_reader_end_rejects_second_live_reader() {
        let graph = ResourceGraph::new();
        let core = Core::<u8>::new(&graph, Policy::ONE_ONE);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let (first, first_recv) = reader(&mut lock);
        first.unwrap();
        let (second, _) = reader(&mut lock);
        assert_eq!(second, Err(ArityError { end: End::Read }.into()));

        // an abandoned reader doesn't count
        drop(first_recv);
        let (third, _) = reader(&mut lock);
        third.unwrap();
    }

    #[test]
    fn abandoned_reader_is_skipped() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::MANY_ONE);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let (_, abandoned) = reader(&mut lock);
        drop(abandoned);
        let (_, mut live) = reader(&mut lock);
        let (_, mut w) = writer(&mut lock, 9);
        lock.update();
        assert_eq!(live.try_recv(), Ok(Ok(9)));
        assert_eq!(w.try_recv(), Ok(Ok(())));
        assert_eq!(lock.pending_readers(), 0);
    }

    #[test]
    fn abandoned_writer_message_is_stashed() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::MANY_ONE);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let (_, abandoned) = writer(&mut lock, 1);
        drop(abandoned);
        let (_, mut w) = writer(&mut lock, 2);
        let (_, mut r) = reader(&mut lock);
        lock.update();
        assert_eq!(r.try_recv(), Ok(Ok(2)));
        assert_eq!(w.try_recv(), Ok(Ok(())));
        assert_eq!(lock.take_discarded(), vec![1]);
    }

    #[test]
    fn close_flushes_queues() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::MANY_MANY);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let mut ws: Vec<_> = (0..3).map(|i| writer(&mut lock, i)).collect();
        lock.update();
        lock.close();
        assert_eq!(lock.take_discarded(), vec![0, 1, 2]);
        assert!(lock.take_discarded().is_empty());
        assert!(lock.is_closed());
        assert_eq!((lock.pending_readers(), lock.pending_writers()), (0, 0));
        for (_, w) in &mut ws {
            assert_eq!(w.try_recv(), Ok(Err(ClosedError)));
        }
        let (after, _) = reader(&mut lock);
        assert_eq!(after, Err(ClosedError.into()));
        let (send, _recv) = oneshot::channel();
        let Err((err, msg)) = lock.register_writer(7, Notify::Direct(send)) else { panic!() };
        assert_eq!((err, msg), (ClosedError.into(), 7));
    }

    #[test]
    fn half_close_on_shared_end_is_no_op() {
        let graph = ResourceGraph::new();
        let core = Core::<u8>::new(&graph, Policy::ONE_MANY);
        let manip = core.acquire();
        let mut lock = core.lock(&manip);
        lock.close_end(End::Read);
        assert!(!lock.is_closed());
        lock.close_end(End::Write);
        assert!(lock.is_closed());
    }

    #[test]
    fn deregistered_writer_gives_back_message() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy {
            buffering: Buffering::Bounded(1),
            ..Policy::MANY_MANY
        });
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        // both receivers stay alive, or the writers would count as abandoned
        let (buffered, _buffered_recv) = writer(&mut lock, "a");
        lock.update();
        let (waiting, _waiting_recv) = writer(&mut lock, "b");
        lock.update();
        assert_eq!(lock.buffered(), 1);
        assert_eq!(lock.try_deregister_writer(buffered), None);
        assert_eq!(lock.try_deregister_writer(waiting), Some("b"));
        assert_eq!(lock.try_deregister_writer(waiting), None);
        assert_eq!(lock.pending_writers(), 1);
        assert!(lock.take_discarded().is_empty());
    }

    #[test]
    fn buffer_drains_ahead_of_waiting_writers() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::buffered(Arity::Many, 2));
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        let mut ws: Vec<_> = (0..4).map(|i| writer(&mut lock, i)).collect();
        lock.update();
        assert_eq!((lock.buffered(), lock.pending_writers()), (2, 4));
        for (_, w) in &mut ws[2..] {
            assert!(w.try_recv().is_err());
        }

        let mut rs: Vec<_> = (0..4).map(|_| reader(&mut lock).1).collect();
        lock.update();
        for (i, r) in rs.iter_mut().enumerate() {
            assert_eq!(r.try_recv(), Ok(Ok(i as i32)));
        }
        for (_, w) in &mut ws[2..] {
            assert_eq!(w.try_recv(), Ok(Ok(())));
        }
        assert_eq!((lock.buffered(), lock.pending_writers()), (0, 0));
    }

    #[test]
    fn close_discards_buffered_messages() {
        let graph = ResourceGraph::new();
        let core = Core::new(&graph, Policy::unbounded(Arity::Many));
        let manip = core.acquire();
        let mut lock = core.lock(&manip);

        for i in 0..3 {
            let (_, mut w) = writer(&mut lock, i);
            lock.update();
            assert_eq!(w.try_recv(), Ok(Ok(())));
        }
        lock.close();
        assert_eq!(lock.take_discarded(), vec![0, 1, 2]);
        assert_eq!((lock.buffered(), lock.pending_writers()), (0, 0));
    }

    #[test]
    fn drop_removes_resource() {
        let graph = ResourceGraph::new();
        let core = Core::<u8>::new(&graph, Policy::ONE_ONE);
        let resource = core.resource().clone();
        assert_eq!(graph.resource_count(), 1);
        drop(core);
        assert!(resource.is_removed());
        assert_eq!(graph.resource_count(), 0);
    }
}
