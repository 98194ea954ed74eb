// the channel-interacting branches of a select.

use super::cell::AltCell;
use crate::{
    channel::{
        core::Core,
        error::{ChannelError, ClosedError},
        ticket_queue::Ticket,
        waiter::Notify,
    },
    graph::{Manipulator, Resource},
};
use std::sync::Arc;
use tokio::sync::oneshot;


// a branch that registers on a channel.
pub(super) trait Branch<R> {
    // the channel's resource.
    fn resource(&self) -> &Resource;

    // run user code that must run before anything is locked.
    fn prepare(&mut self) -> anyhow::Result<()>;

    // register on the channel and run its matching. the manipulator must hold the channel's
    // resource. if this activates the branch, the cell is claimed for it.
    fn register(
        &mut self,
        manip: &Manipulator,
        cell: &Arc<AltCell>,
        index: usize,
    ) -> Result<(), ChannelError>;

    // withdraw the registration, if it's still queued. the manipulator must hold the channel's
    // resource.
    fn deregister(&mut self, manip: &Manipulator);

    // run the process of a branch that activated. call with no resource held.
    fn fire(self: Box<Self>) -> Result<R, ChannelError>;
}

// take what was delivered to a branch that activated.
fn landed<V>(slot: Option<oneshot::Receiver<Result<V, ClosedError>>>) -> Result<V, ChannelError> {
    let mut slot = slot.expect("invariant violation: fired a branch that never registered");
    match slot.try_recv() {
        Ok(outcome) => Ok(outcome?),
        Err(_) => panic!("invariant violation: fired a branch that was not delivered to"),
    }
}


pub(super) struct ReadBranch<T, F> {
    core: Arc<Core<T>>,
    process: F,
    ticket: Option<Ticket>,
    slot: Option<oneshot::Receiver<Result<T, ClosedError>>>,
    // messages the channel threw away while this held the lock. dropped with the branch, after
    // the select releases.
    discarded: Vec<T>,
}

impl<T, F> ReadBranch<T, F> {
    pub(super) fn new(core: Arc<Core<T>>, process: F) -> Self {
        ReadBranch { core, process, ticket: None, slot: None, discarded: Vec::new() }
    }
}

impl<T, R, F: FnOnce(T) -> R> Branch<R> for ReadBranch<T, F> {
    fn resource(&self) -> &Resource {
        self.core.resource()
    }

    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn register(
        &mut self,
        manip: &Manipulator,
        cell: &Arc<AltCell>,
        index: usize,
    ) -> Result<(), ChannelError> {
        let (send, recv) = oneshot::channel();
        let mut lock = self.core.lock(manip);
        let notify = Notify::Branch { cell: Arc::clone(cell), index, slot: send };
        self.ticket = Some(lock.register_reader(notify)?);
        self.slot = Some(recv);
        lock.update();
        self.discarded.extend(lock.take_discarded());
        Ok(())
    }

    fn deregister(&mut self, manip: &Manipulator) {
        if let Some(ticket) = self.ticket.take() {
            self.core.lock(manip).try_deregister_reader(ticket);
        }
    }

    fn fire(self: Box<Self>) -> Result<R, ChannelError> {
        let msg = landed(self.slot)?;
        Ok((self.process)(msg))
    }
}


// where a write branch's message comes from.
pub(super) enum Message<'a, T> {
    Ready(T),
    Produce(Box<dyn FnOnce() -> anyhow::Result<T> + 'a>),
    // handed to the channel.
    Taken,
}

pub(super) struct WriteBranch<'a, T, F> {
    core: Arc<Core<T>>,
    msg: Message<'a, T>,
    process: F,
    ticket: Option<Ticket>,
    slot: Option<oneshot::Receiver<Result<(), ClosedError>>>,
    discarded: Vec<T>,
}

impl<'a, T, F> WriteBranch<'a, T, F> {
    pub(super) fn new(core: Arc<Core<T>>, msg: Message<'a, T>, process: F) -> Self {
        WriteBranch { core, msg, process, ticket: None, slot: None, discarded: Vec::new() }
    }
}

impl<'a, T, R, F: FnOnce() -> R> Branch<R> for WriteBranch<'a, T, F> {
    fn resource(&self) -> &Resource {
        self.core.resource()
    }

    fn prepare(&mut self) -> anyhow::Result<()> {
        if let Message::Produce(_) = self.msg {
            let Message::Produce(produce) = std::mem::replace(&mut self.msg, Message::Taken)
                else { unreachable!() };
            self.msg = Message::Ready(produce()?);
        }
        Ok(())
    }

    fn register(
        &mut self,
        manip: &Manipulator,
        cell: &Arc<AltCell>,
        index: usize,
    ) -> Result<(), ChannelError> {
        let Message::Ready(msg) = std::mem::replace(&mut self.msg, Message::Taken)
            else { panic!("invariant violation: registered a write branch without its message") };
        let (send, recv) = oneshot::channel();
        let mut lock = self.core.lock(manip);
        let notify = Notify::Branch { cell: Arc::clone(cell), index, slot: send };
        match lock.register_writer(msg, notify) {
            Ok(ticket) => self.ticket = Some(ticket),
            Err((e, msg)) => {
                self.msg = Message::Ready(msg);
                return Err(e);
            }
        }
        self.slot = Some(recv);
        lock.update();
        self.discarded.extend(lock.take_discarded());
        Ok(())
    }

    fn deregister(&mut self, manip: &Manipulator) {
        if let Some(ticket) = self.ticket.take() {
            if let Some(msg) = self.core.lock(manip).try_deregister_writer(ticket) {
                self.msg = Message::Ready(msg);
            }
        }
    }

    fn fire(self: Box<Self>) -> Result<R, ChannelError> {
        landed(self.slot)?;
        Ok((self.process)())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alt::cell::Activation,
        channel::policy::Policy,
        graph::ResourceGraph,
    };

    #[test]
    fn write_branch_into_buffer_activates_and_leaves_dummy() {
        let graph = ResourceGraph::new();
        let core = Arc::new(Core::new(&graph, Policy::buffered(crate::Arity::One, 1)));
        let mut branch = WriteBranch::new(Arc::clone(&core), Message::Ready(5), || "sent");
        let (cell, _wake) = AltCell::new();

        let manip = core.acquire();
        Branch::<&str>::prepare(&mut branch).unwrap();
        Branch::<&str>::register(&mut branch, &manip, &cell, 3).unwrap();
        assert_eq!(cell.activation(), Some(Activation::Branch(3)));
        // the buffered message stays put
        Branch::<&str>::deregister(&mut branch, &manip);
        assert_eq!(core.lock(&manip).buffered(), 1);
        drop(manip);

        assert_eq!(Box::new(branch).fire(), Ok("sent"));
    }

    #[test]
    fn failed_message_producer() {
        let graph = ResourceGraph::new();
        let core = Arc::new(Core::<u8>::new(&graph, Policy::ONE_ONE));
        let produce: Box<dyn FnOnce() -> anyhow::Result<u8>> =
            Box::new(|| Err(anyhow::anyhow!("no message today")));
        let mut branch = WriteBranch::new(core, Message::Produce(produce), || ());
        let e = Branch::<()>::prepare(&mut branch).unwrap_err();
        assert_eq!(e.to_string(), "no message today");
    }

    #[test]
    fn deregistered_read_branch_leaves_no_entry() {
        let graph = ResourceGraph::new();
        let core = Arc::new(Core::<u8>::new(&graph, Policy::ONE_ONE));
        let mut branch = ReadBranch::new(Arc::clone(&core), |n: u8| n);
        let (cell, _wake) = AltCell::new();

        let manip = core.acquire();
        Branch::<u8>::register(&mut branch, &manip, &cell, 0).unwrap();
        assert_eq!(core.lock(&manip).pending_readers(), 1);
        assert!(!cell.is_claimed());
        Branch::<u8>::deregister(&mut branch, &manip);
        assert_eq!(core.lock(&manip).pending_readers(), 0);
    }
}
