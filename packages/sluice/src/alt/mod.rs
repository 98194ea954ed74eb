// multi-way select over channels.
//
// a select owns a private resource for the duration of one call. it acquires that resource along
// with every branch's channel in a single acquisition, connects each channel to it, and registers
// on each channel with a notification that claims the select's cell. from then on, anything that
// touches one of those channels also locks the select's resource, so the first claim is final
// and every other registration is dead on arrival. on every exit path the private resource is
// removed again, which splits the channels back apart.

use self::{
    branch::{Branch, Message, ReadBranch, WriteBranch},
    cell::{Activation, AltCell},
};
use crate::{
    channel::{
        api::{ReadEnd, WriteEnd},
        error::{ChannelError, InterruptedError},
    },
    graph::{Manipulator, Resource, ResourceGraph},
    polling::{self, Timeout},
};
use rand::Rng;
use std::{fmt, io, time::Duration};
use thiserror::Error;

pub(crate) mod cell;

mod branch;
mod timer;


/// Error for a select
#[derive(Debug, Error)]
pub enum AltError {
    /// A guard's evaluation failed
    #[error("select guard failed")]
    Guard(#[source] anyhow::Error),
    /// A write branch's message could not be produced
    #[error("select write branch failed to produce its message")]
    Message(#[source] anyhow::Error),
    /// Registering on a branch's channel failed, or the channel closed under the branch, or the
    /// thread was interrupted while blocked
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Every guard was false and there was no fallback branch
    #[error("select has no branches whose guard is true")]
    NoBranches,
    /// The after branch's timer thread could not be started
    #[error("failed to start the select's timer")]
    Timer(#[source] io::Error),
}

/// Condition for a branch to take part in a select
///
/// Guards are evaluated before a select touches any channel, in the order their branches were
/// added (except that the after branch's guard goes after every channel branch's guard and the
/// or-else branch's guard goes last). A branch whose guard is false is left out.
pub struct Guard<'a>(GuardInner<'a>);

enum GuardInner<'a> {
    Value(bool),
    Deferred(Box<dyn FnOnce() -> anyhow::Result<bool> + 'a>),
}

impl<'a> Guard<'a> {
    /// Guard evaluated by calling a closure, which may fail
    ///
    /// A failure aborts the select with [`AltError::Guard`], and no later guard is evaluated.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<bool> + 'a,
    {
        Guard(GuardInner::Deferred(Box::new(f)))
    }

    fn evaluate(self) -> Result<bool, AltError> {
        match self.0 {
            GuardInner::Value(value) => Ok(value),
            GuardInner::Deferred(f) => f().map_err(AltError::Guard),
        }
    }
}

impl From<bool> for Guard<'_> {
    fn from(value: bool) -> Self {
        Guard(GuardInner::Value(value))
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            GuardInner::Value(value) => f.debug_tuple("Guard").field(value).finish(),
            GuardInner::Deferred(_) => f.write_str("Guard(..)"),
        }
    }
}

/// Which channel branch a select offers to first
///
/// If several branches could activate immediately, the first one visited wins. Passing a
/// rotating index across repeated selects, or picking at random, spreads the wins out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Start {
    /// Start at this index into the branches whose guards were true, modulo their number
    Index(usize),
    /// Start at a uniformly random branch
    Random,
}

type Process<'a, R> = Box<dyn FnOnce() -> R + 'a>;

/// Builder and entry point for a select over channels
///
/// Branches are offered to their channels and exactly one of them completes: exactly one
/// process runs, exactly once, and its return value is what the select returns. Processes run
/// on the selecting thread after every lock has been released, so they may use channels freely.
///
/// ```no_run
/// use std::time::Duration;
/// use sluice::{Alt, Channel, ResourceGraph};
///
/// let graph = ResourceGraph::new();
/// let numbers = Channel::<u32>::one_one(&graph);
/// let words = Channel::<String>::one_one(&graph);
///
/// let line = Alt::new(&graph)
///     .add_read_branch(&numbers.read_end(), |n| format!("number {}", n))
///     .add_read_branch(&words.read_end(), |w| format!("word {}", w))
///     .add_after_branch(Duration::from_secs(1), || "nothing".to_owned())
///     .select()
///     .unwrap();
/// ```
pub struct Alt<'a, R> {
    graph: ResourceGraph,
    branches: Vec<(Guard<'a>, Box<dyn Branch<R> + 'a>)>,
    after: Option<(Guard<'a>, Duration, Process<'a, R>)>,
    or_else: Option<(Guard<'a>, Process<'a, R>)>,
}

impl<'a, R> Alt<'a, R> {
    /// Construct with no branches, to select over channels of the given graph
    pub fn new(graph: &ResourceGraph) -> Self {
        Alt {
            graph: graph.clone(),
            branches: Vec::new(),
            after: None,
            or_else: None,
        }
    }

    fn push_branch(mut self, guard: Guard<'a>, branch: Box<dyn Branch<R> + 'a>) -> Self {
        self.branches.push((guard, branch));
        self
    }

    fn check_graph(&self, graph: &ResourceGraph) {
        assert!(
            self.graph.same_graph(graph),
            "select branch on a channel of a different resource graph",
        );
    }

    /// Add a branch that reads from a channel and passes the message to `process`
    pub fn add_read_branch<T, F>(self, end: &ReadEnd<T>, process: F) -> Self
    where
        T: 'a,
        F: FnOnce(T) -> R + 'a,
    {
        self.add_guarded_read_branch(true, end, process)
    }

    /// Add a read branch that only takes part if the guard holds
    pub fn add_guarded_read_branch<T, F>(
        self,
        guard: impl Into<Guard<'a>>,
        end: &ReadEnd<T>,
        process: F,
    ) -> Self
    where
        T: 'a,
        F: FnOnce(T) -> R + 'a,
    {
        self.check_graph(end.core().graph());
        let branch = ReadBranch::new(end.core().clone(), process);
        self.push_branch(guard.into(), Box::new(branch))
    }

    /// Add a branch that writes `msg` to a channel and then runs `process`
    ///
    /// If the branch doesn't activate, the message is dropped.
    pub fn add_write_branch<T, F>(self, end: &WriteEnd<T>, msg: T, process: F) -> Self
    where
        T: 'a,
        F: FnOnce() -> R + 'a,
    {
        self.add_guarded_write_branch(true, end, msg, process)
    }

    /// Add a write branch that only takes part if the guard holds
    pub fn add_guarded_write_branch<T, F>(
        self,
        guard: impl Into<Guard<'a>>,
        end: &WriteEnd<T>,
        msg: T,
        process: F,
    ) -> Self
    where
        T: 'a,
        F: FnOnce() -> R + 'a,
    {
        self.check_graph(end.core().graph());
        let branch = WriteBranch::new(end.core().clone(), Message::Ready(msg), process);
        self.push_branch(guard.into(), Box::new(branch))
    }

    /// Add a write branch whose message is produced by a closure, which may fail
    ///
    /// The closure is only called if the branch's guard holds, after every guard has been
    /// evaluated and before any channel is touched. A failure aborts the select with
    /// [`AltError::Message`].
    pub fn add_write_branch_with<T, M, F>(self, end: &WriteEnd<T>, msg: M, process: F) -> Self
    where
        T: 'a,
        M: FnOnce() -> anyhow::Result<T> + 'a,
        F: FnOnce() -> R + 'a,
    {
        self.add_guarded_write_branch_with(true, end, msg, process)
    }

    /// Add a write branch with a produced message that only takes part if the guard holds
    pub fn add_guarded_write_branch_with<T, M, F>(
        self,
        guard: impl Into<Guard<'a>>,
        end: &WriteEnd<T>,
        msg: M,
        process: F,
    ) -> Self
    where
        T: 'a,
        M: FnOnce() -> anyhow::Result<T> + 'a,
        F: FnOnce() -> R + 'a,
    {
        self.check_graph(end.core().graph());
        let msg = Message::Produce(Box::new(msg));
        let branch = WriteBranch::new(end.core().clone(), msg, process);
        self.push_branch(guard.into(), Box::new(branch))
    }

    /// Add a branch that runs `process` instead of blocking, if no channel branch can complete
    /// immediately
    ///
    /// Panics if the select already has an or-else branch.
    pub fn add_or_else_branch<F>(self, process: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        self.add_guarded_or_else_branch(true, process)
    }

    /// Add an or-else branch that only takes part if the guard holds
    pub fn add_guarded_or_else_branch<F>(mut self, guard: impl Into<Guard<'a>>, process: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        assert!(self.or_else.is_none(), "select given more than one or-else branch");
        self.or_else = Some((guard.into(), Box::new(process)));
        self
    }

    /// Add a branch that runs `process` if no channel branch completes within `delay`
    ///
    /// A zero delay sets no timer at all: the select then waits for a channel branch
    /// indefinitely. Panics if the select already has an after branch.
    pub fn add_after_branch<F>(self, delay: Duration, process: F) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        self.add_guarded_after_branch(true, delay, process)
    }

    /// Add an after branch that only takes part if the guard holds
    pub fn add_guarded_after_branch<F>(
        mut self,
        guard: impl Into<Guard<'a>>,
        delay: Duration,
        process: F,
    ) -> Self
    where
        F: FnOnce() -> R + 'a,
    {
        assert!(self.after.is_none(), "select given more than one after branch");
        self.after = Some((guard.into(), delay, Box::new(process)));
        self
    }

    /// Run the select, offering to channel branches in the order they were added
    pub fn select(self) -> Result<R, AltError> {
        self.select_with(Start::Index(0))
    }

    /// Run the select, choosing which channel branch to offer to first
    ///
    /// Blocks until a branch completes, unless there is an or-else branch. Fails if a guard or
    /// message producer fails, if a branch's channel is closed or its end is over-subscribed, or
    /// if the thread is interrupted while blocked.
    ///
    /// Panics if two branches whose guards hold are on the same channel.
    pub fn select_with(self, start: Start) -> Result<R, AltError> {
        let Alt { graph, branches, after, or_else } = self;

        // evaluate guards, with nothing locked
        let mut live = Vec::with_capacity(branches.len());
        for (guard, branch) in branches {
            if guard.evaluate()? {
                live.push(branch);
            }
        }
        let after = match after {
            Some((guard, delay, process)) => guard.evaluate()?.then_some((delay, process)),
            None => None,
        };
        let or_else = match or_else {
            Some((guard, process)) => guard.evaluate()?.then_some(process),
            None => None,
        };
        if live.is_empty() && after.is_none() && or_else.is_none() {
            return Err(AltError::NoBranches);
        }

        for branch in &mut live {
            branch.prepare().map_err(AltError::Message)?;
        }
        for (i, branch) in live.iter().enumerate() {
            assert!(
                live[..i].iter().all(|other| other.resource() != branch.resource()),
                "same channel in two branches of one select",
            );
        }

        let own = graph.new_resource();
        let (cell, mut woken) = AltCell::new();
        let mut manip = graph.acquire(
            live.iter().map(|branch| branch.resource()).chain([&own])
        );
        trace!(resource = own.id(), branches = live.len(), "select acquired its channels");

        // offer to every branch until one activates
        let n = live.len();
        let start = match start {
            _ if n == 0 => 0,
            Start::Index(i) => i % n,
            Start::Random => rand::thread_rng().gen_range(0..n),
        };
        let mut registered = Vec::with_capacity(n);
        for i in (start..n).chain(0..start) {
            manip.add_dependency(live[i].resource(), &own);
            if let Err(e) = live[i].register(&manip, &cell, i) {
                teardown(manip, &mut live, &registered, &own);
                return Err(e.into());
            }
            registered.push(i);
            if cell.is_claimed() {
                break;
            }
        }

        if let Some(Activation::Branch(i)) = cell.activation() {
            teardown(manip, &mut live, &registered, &own);
            trace!(resource = own.id(), branch = i, "select completed without blocking");
            return fire(live, i);
        }
        if let Some(process) = or_else {
            teardown(manip, &mut live, &registered, &own);
            trace!(resource = own.id(), "select fell through to or-else branch");
            return Ok(process());
        }

        // block
        let (timer, after_process) = match after {
            Some((delay, process)) if !delay.is_zero() => {
                match timer::start(&graph, &own, &cell, delay) {
                    Ok(timer) => (Some(timer), Some(process)),
                    Err(e) => {
                        teardown(manip, &mut live, &registered, &own);
                        return Err(AltError::Timer(e));
                    }
                }
            }
            Some((_, process)) => (None, Some(process)),
            None => (None, None),
        };
        manip.release();
        let blocked = polling::block(&mut woken, Timeout::Never);

        let manip = graph.acquire([&own]);
        if blocked.is_err() && cell.claim(Activation::Interrupted) {
            teardown(manip, &mut live, &registered, &own);
            trace!(resource = own.id(), "select interrupted");
            return Err(ChannelError::from(InterruptedError).into());
        }
        let activation = cell.activation()
            .expect("invariant violation: select woke with nothing claimed");
        teardown(manip, &mut live, &registered, &own);
        drop(timer);
        trace!(resource = own.id(), ?activation, "select completed");

        match activation {
            Activation::Branch(i) => fire(live, i),
            Activation::After => {
                let process = after_process
                    .expect("invariant violation: after branch claimed without a timer");
                Ok(process())
            }
            Activation::Interrupted => unreachable!("interrupt claim observed by a later claim"),
        }
    }
}

// withdraw every registration and remove the select's resource, then release.
fn teardown<R>(
    mut manip: Manipulator,
    live: &mut [Box<dyn Branch<R> + '_>],
    registered: &[usize],
    own: &Resource,
) {
    for &i in registered {
        live[i].deregister(&manip);
    }
    manip.remove_resource(own);
    manip.release();
}

fn fire<R>(live: Vec<Box<dyn Branch<R> + '_>>, i: usize) -> Result<R, AltError> {
    let branch = live.into_iter().nth(i).expect("invariant violation: activated branch index");
    Ok(branch.fire()?)
}

impl<R> fmt::Debug for Alt<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Alt")
            .field("branches", &self.branches.len())
            .field("after", &self.after.as_ref().map(|(_, delay, _)| delay))
            .field("or_else", &self.or_else.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{api::Channel, error::ClosedError},
        task::{self, Task},
    };
    use std::{
        cell::Cell,
        sync::mpsc,
        thread,
        time::Instant,
    };

    #[test]
    fn exactly_one_branch_activates() {
        let graph = ResourceGraph::new();
        let a = Channel::one_one(&graph);
        let b = Channel::one_one(&graph);
        let mut write_a = a.write_end().write_fut("a").unwrap();
        let mut write_b = b.write_end().write_fut("b").unwrap();

        let got = Alt::new(&graph)
            .add_read_branch(&a.read_end(), |msg| msg)
            .add_read_branch(&b.read_end(), |msg| msg)
            .select()
            .unwrap();
        assert_eq!(got, "a");
        assert_eq!(write_a.try_now(), Ok(()));

        // the other writer is still queued, its message untouched
        assert_eq!(b.pending_writers(), 1);
        assert_eq!(b.pending_readers(), 0);
        assert_eq!(write_b.rescind(), Some("b"));

        // the select's resource is gone and the channels are apart again
        assert_eq!(graph.resource_count(), 2);
        assert_ne!(graph.representative(a.resource()), graph.representative(b.resource()));
    }

    #[test]
    fn or_else_runs_without_blocking() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let start = Instant::now();
        let got = Alt::new(&graph)
            .add_read_branch(&ch.read_end(), |_| "read")
            .add_or_else_branch(|| "or else")
            .select()
            .unwrap();
        assert_eq!(got, "or else");
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(ch.pending_readers(), 0);
        assert_eq!(graph.resource_count(), 1);
    }

    #[test]
    fn after_waits_for_its_delay() {
        let graph = ResourceGraph::new();
        let start = Instant::now();
        let got = Alt::new(&graph)
            .add_after_branch(Duration::from_millis(100), || 7)
            .select()
            .unwrap();
        assert_eq!(got, 7);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(graph.resource_count(), 0);
    }

    #[test]
    fn after_loses_to_ready_channel() {
        let graph = ResourceGraph::new();
        let ch = Channel::one_one(&graph);
        let tx = ch.write_end();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.write(5).unwrap();
        });
        let start = Instant::now();
        let got = Alt::new(&graph)
            .add_read_branch(&ch.read_end(), |n| n)
            .add_after_branch(Duration::from_secs(30), || 0)
            .select()
            .unwrap();
        assert_eq!(got, 5);
        assert!(start.elapsed() < Duration::from_secs(30));
        writer.join().unwrap();
    }

    #[test]
    fn false_guard_drops_branch() {
        let graph = ResourceGraph::new();
        let skipped = Channel::one_one(&graph);
        let taken = Channel::one_one(&graph);
        let _write_skipped = skipped.write_end().write_fut(1).unwrap();
        let _write_taken = taken.write_end().write_fut(2).unwrap();
        let got = Alt::new(&graph)
            .add_guarded_read_branch(false, &skipped.read_end(), |n| n)
            .add_guarded_read_branch(Guard::new(|| Ok(true)), &taken.read_end(), |n| n)
            .select()
            .unwrap();
        assert_eq!(got, 2);
        assert_eq!(skipped.pending_writers(), 1);
    }

    #[test]
    fn no_branches() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let result = Alt::new(&graph)
            .add_guarded_read_branch(false, &ch.read_end(), |_| ())
            .add_guarded_after_branch(false, Duration::from_millis(1), || ())
            .add_guarded_or_else_branch(false, || ())
            .select();
        assert!(matches!(result, Err(AltError::NoBranches)));
        assert_eq!(graph.resource_count(), 1);
    }

    #[test]
    fn guard_failure_stops_evaluation() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let later_guards = Cell::new(0);
        let messages = Cell::new(0);
        let result = Alt::new(&graph)
            .add_write_branch_with(&ch.write_end(), || {
                messages.set(messages.get() + 1);
                Ok(1)
            }, || ())
            .add_guarded_after_branch(
                Guard::new(|| Err(anyhow::anyhow!("bad guard"))),
                Duration::from_millis(1),
                || (),
            )
            .add_guarded_or_else_branch(Guard::new(|| {
                later_guards.set(later_guards.get() + 1);
                Ok(true)
            }), || ())
            .select();
        let Err(AltError::Guard(e)) = result else { panic!("expected guard error") };
        assert_eq!(e.to_string(), "bad guard");
        assert_eq!(later_guards.get(), 0);
        // messages are produced after guards
        assert_eq!(messages.get(), 0);
    }

    #[test]
    fn message_failure_aborts_before_registering() {
        let graph = ResourceGraph::new();
        let a = Channel::<u8>::one_one(&graph);
        let b = Channel::<u8>::one_one(&graph);
        let _read_a = a.read_end().read_fut().unwrap();
        let result = Alt::new(&graph)
            .add_write_branch(&a.write_end(), 1, || ())
            .add_write_branch_with(&b.write_end(), || Err(anyhow::anyhow!("no message")), || ())
            .select();
        assert!(matches!(result, Err(AltError::Message(_))));
        // the ready reader was never offered anything
        assert_eq!(a.pending_readers(), 1);
        assert_eq!(graph.resource_count(), 2);
    }

    #[test]
    fn closed_channel_fails_select() {
        let graph = ResourceGraph::new();
        let open = Channel::<u8>::one_one(&graph);
        let closed = Channel::<u8>::one_one(&graph);
        closed.close();
        let result = Alt::new(&graph)
            .add_read_branch(&open.read_end(), |_| ())
            .add_read_branch(&closed.read_end(), |_| ())
            .select();
        assert!(matches!(result, Err(AltError::Channel(ChannelError::Closed(ClosedError)))));
        // the branch registered before the failure was withdrawn
        assert_eq!(open.pending_readers(), 0);
        assert_eq!(graph.resource_count(), 2);
    }

    #[test]
    fn channel_closing_under_blocked_select() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let closer = ch.clone();
        let join = thread::spawn(move || {
            while closer.pending_readers() == 0 {
                thread::yield_now();
            }
            closer.close();
        });
        let result = Alt::new(&graph)
            .add_read_branch(&ch.read_end(), |_| ())
            .select();
        assert!(matches!(result, Err(AltError::Channel(ChannelError::Closed(_)))));
        join.join().unwrap();
    }

    #[test]
    fn arity_violation_surfaces() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let _reader = ch.read_end().read_fut().unwrap();
        let result = Alt::new(&graph)
            .add_read_branch(&ch.read_end(), |_| ())
            .select();
        assert!(matches!(result, Err(AltError::Channel(ChannelError::Arity(_)))));
        assert_eq!(ch.pending_readers(), 1);
    }

    #[test]
    fn write_branch_completes_with_blocked_reader() {
        let graph = ResourceGraph::new();
        let ch = Channel::one_one(&graph);
        let rx = ch.read_end();
        let reader = thread::spawn(move || rx.read());
        let idle = Channel::<String>::one_one(&graph);
        let got = Alt::new(&graph)
            .add_read_branch(&idle.read_end(), |_| "read")
            .add_write_branch(&ch.write_end(), String::from("hello"), || "wrote")
            .select()
            .unwrap();
        assert_eq!(got, "wrote");
        assert_eq!(reader.join().unwrap().as_deref(), Ok("hello"));
        assert_eq!(idle.pending_readers(), 0);
    }

    #[test]
    fn start_index_picks_first_offer() {
        let graph = ResourceGraph::new();
        let chans: Vec<Channel<usize>> = (0..3).map(|_| Channel::one_one(&graph)).collect();
        for start in 0..6 {
            let _writes: Vec<_> = chans.iter()
                .enumerate()
                .map(|(i, ch)| ch.write_end().write_fut(i).unwrap())
                .collect();
            let mut alt = Alt::new(&graph);
            for ch in &chans {
                alt = alt.add_read_branch(&ch.read_end(), |i| i);
            }
            assert_eq!(alt.select_with(Start::Index(start)).unwrap(), start % 3);
        }
    }

    #[test]
    fn random_start_reaches_every_branch() {
        let graph = ResourceGraph::new();
        let chans: Vec<Channel<usize>> = (0..3).map(|_| Channel::one_one(&graph)).collect();
        let mut seen = [false; 3];
        for _ in 0..200 {
            let _writes: Vec<_> = chans.iter()
                .enumerate()
                .map(|(i, ch)| ch.write_end().write_fut(i).unwrap())
                .collect();
            let mut alt = Alt::new(&graph);
            for ch in &chans {
                alt = alt.add_read_branch(&ch.read_end(), |i| i);
            }
            seen[alt.select_with(Start::Random).unwrap()] = true;
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    #[should_panic(expected = "same channel in two branches")]
    fn duplicate_channel_panics() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::many_many(&graph);
        let _ = Alt::new(&graph)
            .add_read_branch(&ch.read_end(), |_| ())
            .add_write_branch(&ch.write_end(), 1, || ())
            .select();
    }

    #[test]
    fn interrupted_select() {
        let graph = ResourceGraph::new();
        let ch = Channel::<u8>::one_one(&graph);
        let (result_send, result_recv) = mpsc::channel();
        let mut task = {
            let graph = graph.clone();
            let rx = ch.read_end();
            Task::new(move || {
                let result = Alt::new(&graph)
                    .add_read_branch(&rx, |_| ())
                    .add_after_branch(Duration::from_secs(60), || ())
                    .select();
                let interrupted = matches!(
                    result,
                    Err(AltError::Channel(ChannelError::Interrupted(_))),
                );
                result_send.send((interrupted, task::is_interrupted())).unwrap();
            })
        };
        task.schedule().unwrap();
        while ch.pending_readers() == 0 {
            thread::yield_now();
        }
        task.interrupt();
        assert_eq!(result_recv.recv().unwrap(), (true, true));
        task.deschedule();
        assert_eq!(ch.pending_readers(), 0);
        assert_eq!(graph.resource_count(), 1);
    }

    #[test]
    fn selects_contend_without_deadlock() {
        // two selects each offering on both channels in opposite orders, fed by two writers
        let graph = ResourceGraph::new();
        let a = Channel::many_many(&graph);
        let b = Channel::many_many(&graph);
        let rounds = 200;
        let writers: Vec<_> = [a.write_end(), b.write_end()].into_iter()
            .map(|tx| thread::spawn(move || {
                for i in 0..rounds {
                    tx.write(i).unwrap();
                }
            }))
            .collect();
        let selectors: Vec<_> = (0..2)
            .map(|s| {
                let graph = graph.clone();
                let (a, b) = (a.read_end(), b.read_end());
                thread::spawn(move || {
                    (0..rounds)
                        .map(|_| {
                            let (first, second) = if s == 0 { (&a, &b) } else { (&b, &a) };
                            Alt::new(&graph)
                                .add_read_branch(first, |n| n)
                                .add_read_branch(second, |n| n)
                                .select()
                                .unwrap()
                        })
                        .count()
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let total: usize = selectors.into_iter().map(|s| s.join().unwrap()).sum();
        assert_eq!(total, 2 * rounds as usize);
        assert_eq!(graph.resource_count(), 2);
    }
}
