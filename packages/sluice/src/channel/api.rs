// the exposed channel API.

use self::future::{ReadFut, WriteFut};
use super::{
    core::Core,
    error::*,
    policy::{Arity, Policy},
    waiter::Notify,
};
use crate::graph::{Resource, ResourceGraph};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;


/// A synchronous channel between threads
///
/// A write completes when a reader takes its message, or, for buffered variants, when the buffer
/// accepts it. Readers and writers are each served in the order they arrived. Which variant a
/// channel is, is fixed at construction by its [`Policy`].
///
/// This handle, and the [`ReadEnd`] and [`WriteEnd`] handles obtained from it, are all cheap to
/// clone and share the same channel. The channel's vertex leaves its [`ResourceGraph`] once the
/// last handle is dropped.
pub struct Channel<T> {
    core: Arc<Core<T>>,
}

impl<T> Channel<T> {
    /// Construct a channel of any variant
    pub fn new(graph: &ResourceGraph, policy: Policy) -> Self {
        Channel { core: Arc::new(Core::new(graph, policy)) }
    }

    /// One reader and one writer at a time, unbuffered
    pub fn one_one(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::ONE_ONE)
    }

    /// Many readers and one writer at a time, unbuffered
    pub fn one_many(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::ONE_MANY)
    }

    /// One reader and many writers at a time, unbuffered
    pub fn many_one(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::MANY_ONE)
    }

    /// Many readers and many writers, unbuffered
    pub fn many_many(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::MANY_MANY)
    }

    /// One reader at a time, any number of writers, buffering up to `capacity` messages
    pub fn buffered_one(graph: &ResourceGraph, capacity: usize) -> Self {
        Self::new(graph, Policy::buffered(Arity::One, capacity))
    }

    /// Any number of readers and writers, buffering up to `capacity` messages
    pub fn buffered_many(graph: &ResourceGraph, capacity: usize) -> Self {
        Self::new(graph, Policy::buffered(Arity::Many, capacity))
    }

    /// One reader at a time, any number of writers, writes never block
    ///
    /// See [`Buffering::Unbounded`](crate::Buffering::Unbounded) for the memory caveat.
    pub fn unbounded_one(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::unbounded(Arity::One))
    }

    /// Any number of readers and writers, writes never block
    ///
    /// See [`Buffering::Unbounded`](crate::Buffering::Unbounded) for the memory caveat.
    pub fn unbounded_many(graph: &ResourceGraph) -> Self {
        Self::new(graph, Policy::unbounded(Arity::Many))
    }

    /// Handle for reading from this channel
    pub fn read_end(&self) -> ReadEnd<T> {
        ReadEnd { core: Arc::clone(&self.core) }
    }

    /// Handle for writing to this channel
    pub fn write_end(&self) -> WriteEnd<T> {
        WriteEnd { core: Arc::clone(&self.core) }
    }

    /// Close the channel
    ///
    /// Every reader and writer waiting on it fails with [`ClosedError`], buffered messages are
    /// dropped, and every later operation fails with [`ClosedError`]. Closing twice does nothing.
    pub fn close(&self) {
        close(&self.core, None)
    }

    /// Whether the channel is closed
    pub fn is_closed(&self) -> bool {
        is_closed(&self.core)
    }

    /// The variant this channel was constructed as
    pub fn policy(&self) -> Policy {
        self.core.policy()
    }

    /// The channel's vertex in its resource graph
    pub fn resource(&self) -> &Resource {
        self.core.resource()
    }

    /// Number of readers currently queued
    ///
    /// May count readers that were abandoned but not yet noticed as such.
    pub fn pending_readers(&self) -> usize {
        let manip = self.core.acquire();
        let count = self.core.lock(&manip).pending_readers();
        count
    }

    /// Number of writers currently queued, including messages held by the buffer
    ///
    /// May count writers that were abandoned but not yet noticed as such.
    pub fn pending_writers(&self) -> usize {
        let manip = self.core.acquire();
        let count = self.core.lock(&manip).pending_writers();
        count
    }

    /// Number of messages currently held by the buffer
    pub fn buffered(&self) -> usize {
        let manip = self.core.acquire();
        let count = self.core.lock(&manip).buffered();
        count
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel { core: Arc::clone(&self.core) }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("resource", self.core.resource())
            .field("policy", &self.core.policy())
            .finish()
    }
}

fn close<T>(core: &Core<T>, end: Option<End>) {
    let manip = core.acquire();
    let discarded = {
        let mut lock = core.lock(&manip);
        match end {
            Some(end) => lock.close_end(end),
            None => lock.close(),
        }
        lock.take_discarded()
    };
    manip.release();
    drop(discarded);
}

fn is_closed<T>(core: &Core<T>) -> bool {
    let manip = core.acquire();
    let closed = core.lock(&manip).is_closed();
    closed
}


/// Handle for reading from a [`Channel`]
pub struct ReadEnd<T> {
    core: Arc<Core<T>>,
}

impl<T> ReadEnd<T> {
    pub(crate) fn core(&self) -> &Arc<Core<T>> {
        &self.core
    }

    /// Read a message, blocking until one is available
    ///
    /// If the thread is interrupted while blocked, this fails with [`InterruptedError`] unless a
    /// message already arrived, in which case the message wins and the interrupt flag stays set.
    pub fn read(&self) -> Result<T, ChannelError> {
        self.read_fut()?.block()
    }

    /// Read a message, blocking until one is available or the timeout elapses
    pub fn read_timeout(&self, timeout: Duration) -> Result<T, TryChannelError> {
        self.read_deadline(Instant::now() + timeout)
    }

    /// Read a message, blocking until one is available or the deadline is reached
    pub fn read_deadline(&self, deadline: Instant) -> Result<T, TryChannelError> {
        self.read_fut()?.block_deadline(deadline)
    }

    /// Read a message if one is available without blocking
    pub fn try_read(&self) -> Result<T, TryChannelError> {
        self.read_fut()?.try_now()
    }

    /// Register a read and return a future for its outcome
    ///
    /// The read holds its place in the queue of readers until the future resolves or is dropped.
    /// See [`ReadFut`] for blocking and non-blocking ways of waiting on it.
    pub fn read_fut(&self) -> Result<ReadFut<T>, ChannelError> {
        let (send, recv) = oneshot::channel();
        let manip = self.core.acquire();
        let (ticket, discarded) = {
            let mut lock = self.core.lock(&manip);
            let ticket = lock.register_reader(Notify::Direct(send))?;
            lock.update();
            (ticket, lock.take_discarded())
        };
        manip.release();
        drop(discarded);
        Ok(ReadFut::new(Arc::clone(&self.core), ticket, recv))
    }

    /// Close the read end
    ///
    /// Closes the whole channel if readers have arity one, otherwise does nothing.
    pub fn close(&self) {
        close(&self.core, Some(End::Read))
    }

    /// Whether the channel is closed
    pub fn is_closed(&self) -> bool {
        is_closed(&self.core)
    }
}

impl<T> Clone for ReadEnd<T> {
    fn clone(&self) -> Self {
        ReadEnd { core: Arc::clone(&self.core) }
    }
}

impl<T> fmt::Debug for ReadEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("ReadEnd").field(self.core.resource()).finish()
    }
}


/// Handle for writing to a [`Channel`]
pub struct WriteEnd<T> {
    core: Arc<Core<T>>,
}

impl<T> WriteEnd<T> {
    pub(crate) fn core(&self) -> &Arc<Core<T>> {
        &self.core
    }

    /// Write a message, blocking until a reader or the buffer takes it
    ///
    /// If this fails, the message is dropped. Use [`write_fut`](Self::write_fut) to get it back
    /// from an abandoned write.
    pub fn write(&self, msg: T) -> Result<(), ChannelError> {
        self.write_fut(msg)?.block()
    }

    /// Write a message, blocking until it is taken or the timeout elapses
    pub fn write_timeout(&self, msg: T, timeout: Duration) -> Result<(), TryChannelError> {
        self.write_deadline(msg, Instant::now() + timeout)
    }

    /// Write a message, blocking until it is taken or the deadline is reached
    pub fn write_deadline(&self, msg: T, deadline: Instant) -> Result<(), TryChannelError> {
        self.write_fut(msg)?.block_deadline(deadline)
    }

    /// Write a message if a reader or the buffer can take it without blocking
    pub fn try_write(&self, msg: T) -> Result<(), TryChannelError> {
        self.write_fut(msg)?.try_now()
    }

    /// Register a write and return a future for its outcome
    ///
    /// The write holds its place in the queue of writers until the future resolves or is
    /// dropped. See [`WriteFut`] for blocking and non-blocking ways of waiting on it.
    pub fn write_fut(&self, msg: T) -> Result<WriteFut<T>, ChannelError> {
        let (send, recv) = oneshot::channel();
        let manip = self.core.acquire();
        let registered = {
            let mut lock = self.core.lock(&manip);
            lock.register_writer(msg, Notify::Direct(send)).map(|ticket| {
                lock.update();
                (ticket, lock.take_discarded())
            })
        };
        manip.release();
        // the rejected message is dropped only here, with nothing held
        let (ticket, discarded) = registered.map_err(|(e, _msg)| e)?;
        drop(discarded);
        Ok(WriteFut::new(Arc::clone(&self.core), ticket, recv))
    }

    /// Close the write end
    ///
    /// Closes the whole channel if writers have arity one, otherwise does nothing.
    pub fn close(&self) {
        close(&self.core, Some(End::Write))
    }

    /// Whether the channel is closed
    pub fn is_closed(&self) -> bool {
        is_closed(&self.core)
    }
}

impl<T> Clone for WriteEnd<T> {
    fn clone(&self) -> Self {
        WriteEnd { core: Arc::clone(&self.core) }
    }
}

impl<T> fmt::Debug for WriteEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("WriteEnd").field(self.core.resource()).finish()
    }
}


pub(crate) mod future {
    use super::*;
    use crate::{
        channel::ticket_queue::Ticket,
        polling::{block, Blocked, Timeout},
    };
    use std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::sync::oneshot::error::TryRecvError;

    // what the engine delivered to a registration.
    fn map_outcome<V>(outcome: Result<Result<V, ClosedError>, oneshot::error::RecvError>)
        -> Result<V, ChannelError>
    {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ClosedError)) => Err(ClosedError.into()),
            // the engine only drops a registration undelivered when the channel goes away
            Err(_) => Err(ClosedError.into()),
        }
    }

    // turn the result of blocking on a registration into the operation's result, given the
    // outcome that landed while cancelling, if any.
    fn map_blocked<V>(
        blocked: Blocked,
        landed: Option<Result<V, ChannelError>>,
    ) -> Result<V, TryChannelError> {
        match (landed, blocked) {
            (Some(result), _) => result.map_err(TryChannelError::from),
            (None, Blocked::TimedOut) => Err(WouldBlockError.into()),
            (None, Blocked::Interrupted) => Err(InterruptedError.into()),
        }
    }

    /// Future for reading from a [`ReadEnd`]
    ///
    /// The read is registered on the channel from construction until this future resolves. If
    /// this future is dropped before resolving, the read is withdrawn; a message that a writer
    /// handed over in the meantime is dropped with it.
    pub struct ReadFut<T> {
        core: Arc<Core<T>>,
        // none once resolved or withdrawn.
        ticket: Option<Ticket>,
        recv: oneshot::Receiver<Result<T, ClosedError>>,
    }

    impl<T> ReadFut<T> {
        pub(super) fn new(
            core: Arc<Core<T>>,
            ticket: Ticket,
            recv: oneshot::Receiver<Result<T, ClosedError>>,
        ) -> Self {
            ReadFut { core, ticket: Some(ticket), recv }
        }

        // withdraw the read, unless it already resolved, in which case return what it resolved
        // to.
        fn cancel(&mut self) -> Option<Result<T, ChannelError>> {
            let ticket = self.ticket.take()?;
            let manip = self.core.acquire();
            match self.recv.try_recv() {
                Ok(outcome) => Some(map_outcome(Ok(outcome))),
                Err(TryRecvError::Empty) => {
                    self.core.lock(&manip).deregister_reader(ticket);
                    None
                }
                Err(TryRecvError::Closed) => Some(Err(ClosedError.into())),
            }
        }

        /// Withdraw the read, unless it already resolved
        ///
        /// Does nothing if this future has already resolved or aborted. This method never
        /// panics.
        pub fn abort(&mut self) {
            self.cancel();
        }

        /// Block until this future resolves
        ///
        /// If the thread is interrupted first, the read is withdrawn and this fails with
        /// [`InterruptedError`], unless a message landed before the withdrawal. This method will
        /// panic if this future has already resolved or aborted.
        pub fn block(&mut self) -> Result<T, ChannelError> {
            assert!(!self.is_terminated(), "ReadFut.block called after terminated");
            match block(self, Timeout::Never) {
                Ok(result) => result,
                Err(blocked) => {
                    let landed = self.cancel();
                    match map_blocked(blocked, landed) {
                        Ok(msg) => Ok(msg),
                        Err(TryChannelError::Terminal(e)) => Err(e),
                        Err(TryChannelError::WouldBlock(_)) =>
                            unreachable!("block timed out with Timeout::Never"),
                    }
                }
            }
        }

        /// Try to resolve this future immediately without blocking
        ///
        /// If this fails with [`WouldBlockError`], the read is withdrawn. Either way, this counts
        /// as this future resolving. This method will panic if this future has already resolved
        /// or aborted.
        pub fn try_now(&mut self) -> Result<T, TryChannelError> {
            assert!(!self.is_terminated(), "ReadFut.try_now called after terminated");
            self.block_inner(Timeout::NonBlocking)
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// Same as [`block_deadline`](Self::block_deadline) with a deadline of now plus the
        /// timeout.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<T, TryChannelError> {
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// If the deadline passes first, the read is withdrawn and this fails with
        /// [`WouldBlockError`]. Either way, this counts as this future resolving. This method will
        /// panic if this future has already resolved or aborted.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<T, TryChannelError> {
            assert!(!self.is_terminated(), "ReadFut.block_deadline called after terminated");
            self.block_inner(Timeout::At(deadline))
        }

        fn block_inner(&mut self, timeout: Timeout) -> Result<T, TryChannelError> {
            match block(self, timeout) {
                Ok(result) => result.map_err(TryChannelError::from),
                Err(blocked) => {
                    let landed = self.cancel();
                    map_blocked(blocked, landed)
                }
            }
        }

        /// Whether this future has already resolved or aborted
        pub fn is_terminated(&self) -> bool {
            self.ticket.is_none()
        }
    }

    impl<T> Future for ReadFut<T> {
        type Output = Result<T, ChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.is_terminated() {
                return Poll::Pending;
            }
            Pin::new(&mut this.recv).poll(cx).map(|outcome| {
                this.ticket = None;
                map_outcome(outcome)
            })
        }
    }

    #[cfg(feature = "futures")]
    impl<T> futures::future::FusedFuture for ReadFut<T> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }

    impl<T> Drop for ReadFut<T> {
        fn drop(&mut self) {
            self.cancel();
        }
    }

    impl<T> fmt::Debug for ReadFut<T> {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.debug_struct("ReadFut")
                .field("resource", self.core.resource())
                .field("terminated", &self.is_terminated())
                .finish()
        }
    }


    /// Future for writing to a [`WriteEnd`]
    ///
    /// The write is registered on the channel from construction until this future resolves. If
    /// this future has not yet resolved, the write may be withdrawn and its message retrieved by
    /// calling [`rescind`](Self::rescind) (or dropped by dropping this future).
    pub struct WriteFut<T> {
        core: Arc<Core<T>>,
        // none once resolved or rescinded.
        ticket: Option<Ticket>,
        recv: oneshot::Receiver<Result<(), ClosedError>>,
    }

    // result of withdrawing a write.
    enum Withdrawn<T> {
        // it resolved first.
        Resolved(Result<(), ChannelError>),
        Rescinded(T),
    }

    impl<T> WriteFut<T> {
        pub(super) fn new(
            core: Arc<Core<T>>,
            ticket: Ticket,
            recv: oneshot::Receiver<Result<(), ClosedError>>,
        ) -> Self {
            WriteFut { core, ticket: Some(ticket), recv }
        }

        fn cancel(&mut self) -> Option<Withdrawn<T>> {
            let ticket = self.ticket.take()?;
            let manip = self.core.acquire();
            Some(match self.recv.try_recv() {
                Ok(outcome) => Withdrawn::Resolved(map_outcome(Ok(outcome))),
                Err(TryRecvError::Empty) =>
                    Withdrawn::Rescinded(self.core.lock(&manip).deregister_writer(ticket)),
                Err(TryRecvError::Closed) => Withdrawn::Resolved(Err(ClosedError.into())),
            })
        }

        fn cancel_landed(&mut self) -> Option<Result<(), ChannelError>> {
            match self.cancel()? {
                Withdrawn::Resolved(result) => Some(result),
                Withdrawn::Rescinded(_) => None,
            }
        }

        /// If the message has not yet been taken, withdraw the write and get the message back
        ///
        /// Returns `None` if this future already resolved or rescinded, or if a reader or the
        /// buffer took the message first.
        pub fn rescind(&mut self) -> Option<T> {
            match self.cancel()? {
                Withdrawn::Rescinded(msg) => Some(msg),
                Withdrawn::Resolved(_) => None,
            }
        }

        /// Block until this future resolves
        ///
        /// If the thread is interrupted first, the write is withdrawn, its message dropped, and
        /// this fails with [`InterruptedError`], unless the message was taken before the
        /// withdrawal. This method will panic if this future has already resolved or rescinded.
        pub fn block(&mut self) -> Result<(), ChannelError> {
            assert!(!self.is_terminated(), "WriteFut.block called after terminated");
            match block(self, Timeout::Never) {
                Ok(result) => result,
                Err(blocked) => {
                    let landed = self.cancel_landed();
                    match map_blocked(blocked, landed) {
                        Ok(()) => Ok(()),
                        Err(TryChannelError::Terminal(e)) => Err(e),
                        Err(TryChannelError::WouldBlock(_)) =>
                            unreachable!("block timed out with Timeout::Never"),
                    }
                }
            }
        }

        /// Try to resolve this future immediately without blocking
        ///
        /// If this fails with [`WouldBlockError`], the write is withdrawn and its message
        /// dropped. Either way, this counts as this future resolving. This method will panic if
        /// this future has already resolved or rescinded.
        pub fn try_now(&mut self) -> Result<(), TryChannelError> {
            assert!(!self.is_terminated(), "WriteFut.try_now called after terminated");
            self.block_inner(Timeout::NonBlocking)
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// Same as [`block_deadline`](Self::block_deadline) with a deadline of now plus the
        /// timeout.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<(), TryChannelError> {
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// If the deadline passes first, the write is withdrawn, its message dropped, and this
        /// fails with [`WouldBlockError`]. Either way, this counts as this future resolving. This
        /// method will panic if this future has already resolved or rescinded.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<(), TryChannelError> {
            assert!(!self.is_terminated(), "WriteFut.block_deadline called after terminated");
            self.block_inner(Timeout::At(deadline))
        }

        fn block_inner(&mut self, timeout: Timeout) -> Result<(), TryChannelError> {
            match block(self, timeout) {
                Ok(result) => result.map_err(TryChannelError::from),
                Err(blocked) => {
                    let landed = self.cancel_landed();
                    map_blocked(blocked, landed)
                }
            }
        }

        /// Whether this future has already resolved or rescinded
        pub fn is_terminated(&self) -> bool {
            self.ticket.is_none()
        }
    }

    impl<T> Future for WriteFut<T> {
        type Output = Result<(), ChannelError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.is_terminated() {
                return Poll::Pending;
            }
            Pin::new(&mut this.recv).poll(cx).map(|outcome| {
                this.ticket = None;
                map_outcome(outcome)
            })
        }
    }

    #[cfg(feature = "futures")]
    impl<T> futures::future::FusedFuture for WriteFut<T> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }

    impl<T> Drop for WriteFut<T> {
        fn drop(&mut self) {
            self.cancel();
        }
    }

    impl<T> fmt::Debug for WriteFut<T> {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.debug_struct("WriteFut")
                .field("resource", self.core.resource())
                .field("terminated", &self.is_terminated())
                .finish()
        }
    }
}
