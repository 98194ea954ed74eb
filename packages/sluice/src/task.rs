//! Minimal task spawner and thread interruption.
//!
//! A [`Task`] is one native thread. What it adds over [`std::thread`] is interruption: every
//! thread has an interrupt flag, and interrupting a thread that is blocked in a channel operation,
//! a select or [`sleep`] wakes it up, making that operation fail with an interrupted error. The
//! flag stays set until [`clear_interrupt`] is called, so outer code can still observe it.

use crate::{
    error::InterruptedError,
    polling::{self, Parked, Signal},
};
use std::{
    any::Any,
    cell::RefCell,
    fmt,
    io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};


thread_local! {
    static CURRENT: RefCell<Option<Arc<Interrupt>>> = const { RefCell::new(None) };
}

// interrupt state of one thread.
#[derive(Default)]
pub(crate) struct Interrupt {
    raised: AtomicBool,
    // signal the thread is currently blocked on, if any.
    parked: Mutex<Option<Arc<Signal>>>,
}

impl Interrupt {
    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(SeqCst)
    }

    fn raise(&self) {
        self.raised.store(true, SeqCst);
        if let Some(signal) = self.parked.lock().unwrap().clone() {
            signal.notify();
        }
    }

    fn clear(&self) -> bool {
        self.raised.swap(false, SeqCst)
    }

    pub(crate) fn park(&self, signal: Arc<Signal>) -> Parked<'_> {
        *self.parked.lock().unwrap() = Some(signal);
        Parked::new(self)
    }

    pub(crate) fn unpark(&self) {
        *self.parked.lock().unwrap() = None;
    }
}

// interrupt state of the calling thread.
pub(crate) fn current_state() -> Arc<Interrupt> {
    CURRENT.with(|current| {
        Arc::clone(current.borrow_mut().get_or_insert_with(Default::default))
    })
}

fn install_state(interrupt: Arc<Interrupt>) {
    CURRENT.with(|current| *current.borrow_mut() = Some(interrupt));
}

/// Handle for interrupting a particular thread
#[derive(Clone)]
pub struct InterruptHandle(Arc<Interrupt>);

impl InterruptHandle {
    /// Set the thread's interrupt flag, waking it if it is blocked
    pub fn interrupt(&self) {
        self.0.raise();
    }

    /// Whether the thread's interrupt flag is set
    pub fn is_interrupted(&self) -> bool {
        self.0.is_raised()
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InterruptHandle").field("interrupted", &self.is_interrupted()).finish()
    }
}

/// Interrupt handle for the calling thread
pub fn current_interrupt() -> InterruptHandle {
    InterruptHandle(current_state())
}

/// Whether the calling thread's interrupt flag is set
pub fn is_interrupted() -> bool {
    current_state().is_raised()
}

/// Clear the calling thread's interrupt flag, returning whether it was set
pub fn clear_interrupt() -> bool {
    current_state().clear()
}

/// Sleep for the given duration, unless interrupted first
pub fn sleep(duration: Duration) -> Result<(), InterruptedError> {
    polling::sleep_until(Instant::now() + duration).map_err(|_| InterruptedError)
}


type PanicHandler = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// A body of code to run on its own native thread
///
/// Constructed unscheduled; [`schedule`](Self::schedule) starts it. A non-daemon task joins its
/// thread when dropped, a daemon task detaches it.
pub struct Task {
    name: Option<String>,
    body: Option<Box<dyn FnOnce() + Send>>,
    on_panic: Option<PanicHandler>,
    daemon: bool,
    interrupt: Arc<Interrupt>,
    join: Option<JoinHandle<()>>,
}

impl Task {
    /// Wrap a body of code into an unscheduled task
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task {
            name: None,
            body: Some(Box::new(body)),
            on_panic: None,
            daemon: false,
            interrupt: Arc::default(),
            join: None,
        }
    }

    /// Name the task's thread
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set whether dropping the task detaches its thread rather than joining it
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Handle a panic escaping the body, instead of logging it
    pub fn on_panic<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Box<dyn Any + Send>) + Send + 'static,
    {
        self.on_panic = Some(Box::new(handler));
        self
    }

    /// Start running the task on a new thread
    ///
    /// Panics if the task was already scheduled.
    pub fn schedule(&mut self) -> io::Result<()> {
        let body = self.body.take().expect("task scheduled twice");
        let on_panic = self.on_panic.take();
        let interrupt = Arc::clone(&self.interrupt);
        let name = self.name.clone();

        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        self.join = Some(builder.spawn(move || {
            install_state(interrupt);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(body)) {
                match on_panic {
                    Some(handler) => handler(payload),
                    None => error!(task = ?name, "task panicked with no panic handler"),
                }
            }
        })?);
        Ok(())
    }

    /// Block until the task's body has returned
    ///
    /// Returns immediately if the task was never scheduled or was already descheduled.
    pub fn deschedule(&mut self) {
        if let Some(join) = self.join.take() {
            // panics were already caught inside the thread
            let _ = join.join();
        }
    }

    /// Interrupt the task's thread
    pub fn interrupt(&self) {
        self.interrupt.raise();
    }

    /// Handle for interrupting the task's thread from elsewhere
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle(Arc::clone(&self.interrupt))
    }

    /// Whether the task was scheduled and its body has returned
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_some_and(|join| join.is_finished())
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if !self.daemon {
            self.deschedule();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("daemon", &self.daemon)
            .field("scheduled", &self.join.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn deschedule_waits_for_body() {
        let (send, recv) = mpsc::channel();
        let mut task = Task::new(move || {
            thread::sleep(Duration::from_millis(30));
            send.send(()).unwrap();
        });
        task.schedule().unwrap();
        task.deschedule();
        assert!(recv.try_recv().is_ok());
    }

    #[test]
    fn interrupt_cuts_sleep_short() {
        let (send, recv) = mpsc::channel();
        let mut task = Task::new(move || {
            let start = Instant::now();
            let result = sleep(Duration::from_secs(30));
            send.send((result, start.elapsed(), is_interrupted(), clear_interrupt(), is_interrupted()))
                .unwrap();
        });
        task.schedule().unwrap();
        thread::sleep(Duration::from_millis(30));
        task.interrupt();
        let (result, elapsed, flagged, cleared, flagged_after) = recv.recv().unwrap();
        assert_eq!(result, Err(InterruptedError));
        assert!(elapsed < Duration::from_secs(10));
        assert!(flagged && cleared && !flagged_after);
    }

    #[test]
    fn sleep_is_not_early() {
        let start = Instant::now();
        sleep(Duration::from_millis(40)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn panic_goes_to_handler() {
        let (send, recv) = mpsc::channel();
        let mut task = Task::new(|| panic!("boom"))
            .on_panic(move |payload| {
                send.send(payload.downcast_ref::<&str>().map(|s| s.to_string())).unwrap();
            });
        task.schedule().unwrap();
        task.deschedule();
        assert_eq!(recv.recv().unwrap().as_deref(), Some("boom"));
    }

    #[test]
    fn interrupt_before_blocking_is_not_lost() {
        let (send, recv) = mpsc::channel();
        let mut task = Task::new(move || send.send(sleep(Duration::from_secs(30))).unwrap());
        task.interrupt();
        assert!(task.interrupt_handle().is_interrupted());
        task.schedule().unwrap();
        assert_eq!(recv.recv().unwrap(), Err(InterruptedError));
    }
}
