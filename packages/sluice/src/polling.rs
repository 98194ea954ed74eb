// blocking on the crate's internal futures.
//
// design based on the pollster crate: a waker that notifies a mutex + condvar signal, and a loop
// that polls, then sleeps on the signal. on top of that, a parked thread also registers its signal
// with its own interrupt state, so that interrupting it wakes it up.

use crate::task::{self, Interrupt};
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Condvar, Mutex},
    task::{Context, Poll, Wake, Waker},
    time::Instant,
};


// timeout for blocking on a future.
#[derive(Debug, Copy, Clone)]
pub(crate) enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
    // time out if the future cannot be resolved without blocking.
    NonBlocking,
}

// reason blocking stopped before the future resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Blocked {
    TimedOut,
    // the thread's interrupt flag is set. it is left set.
    Interrupted,
}

// poll the future until it resolves, the timeout is reached, or the thread is interrupted.
//
// the future is left unresolved in the error cases; it's up to the caller to cancel it.
pub(crate) fn block<F>(fut: &mut F, timeout: Timeout) -> Result<F::Output, Blocked>
where
    F: Future + Unpin,
{
    let signal = Arc::new(Signal::default());
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);
    let interrupt = task::current_state();
    let _parked = interrupt.park(Arc::clone(&signal));

    loop {
        // return if ready
        if let Poll::Ready(output) = Pin::new(&mut *fut).poll(&mut cx) {
            return Ok(output);
        }
        if interrupt.is_raised() {
            return Err(Blocked::Interrupted);
        }

        // otherwise, block until notification or timeout
        let mut lock = signal.state.lock().unwrap();

        // if a notification is already present, go around again without blocking
        if let State::Notified = *lock {
            *lock = State::Empty;
            continue;
        }

        debug_assert!(matches!(*lock, State::Empty));
        *lock = State::Waiting;
        match timeout {
            Timeout::Never =>
                while let State::Waiting = *lock {
                    lock = signal.cond.wait(lock).unwrap();
                },
            Timeout::At(deadline) =>
                while let State::Waiting = *lock {
                    let Some(duration) = deadline.checked_duration_since(Instant::now())
                        else { return Err(Blocked::TimedOut) };
                    let (lock2, wait_result) = signal.cond.wait_timeout(lock, duration).unwrap();
                    lock = lock2;
                    if wait_result.timed_out() && matches!(*lock, State::Waiting) {
                        return Err(Blocked::TimedOut);
                    }
                },
            Timeout::NonBlocking => return Err(Blocked::TimedOut),
        }
        *lock = State::Empty;
    }
}

// block on a future that never resolves, i.e. sleep until the deadline or an interrupt.
pub(crate) fn sleep_until(deadline: Instant) -> Result<(), Blocked> {
    match block(&mut std::future::pending::<()>(), Timeout::At(deadline)) {
        Ok(()) => Ok(()),
        Err(Blocked::TimedOut) => Ok(()),
        Err(Blocked::Interrupted) => Err(Blocked::Interrupted),
    }
}

// synchronization signal state
#[derive(Default)]
enum State {
    #[default]
    Empty,
    Waiting,
    Notified,
}

// synchronization signal
#[derive(Default)]
pub(crate) struct Signal {
    state: Mutex<State>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        let mut lock = self.state.lock().unwrap();
        match *lock {
            State::Notified => (),
            State::Empty => *lock = State::Notified,
            State::Waiting => {
                *lock = State::Empty;
                self.cond.notify_one();
            }
        }
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.notify();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify();
    }
}

// keeps a signal registered as the one an interrupt should notify.
pub(crate) struct Parked<'a>(&'a Interrupt);

impl<'a> Parked<'a> {
    pub(crate) fn new(interrupt: &'a Interrupt) -> Self {
        Parked(interrupt)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.unpark();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};
    use tokio::sync::oneshot;

    #[test]
    fn resolves_when_woken_from_other_thread() {
        let (send, mut recv) = oneshot::channel();
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            send.send(7).unwrap();
        });
        assert_eq!(block(&mut recv, Timeout::Never), Ok(Ok(7)));
        join.join().unwrap();
    }

    #[test]
    fn times_out() {
        let (_send, mut recv) = oneshot::channel::<()>();
        let start = Instant::now();
        let result = block(&mut recv, Timeout::At(start + Duration::from_millis(50)));
        assert_eq!(result, Err(Blocked::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(block(&mut recv, Timeout::NonBlocking), Err(Blocked::TimedOut));
    }

    #[test]
    fn interrupt_wakes_parked_thread() {
        let (send, recv) = std::sync::mpsc::channel();
        let join = thread::spawn(move || {
            send.send(task::current_interrupt()).unwrap();
            let (_send, mut recv) = oneshot::channel::<()>();
            let result = block(&mut recv, Timeout::Never);
            // the flag stays observable
            (result, task::is_interrupted())
        });
        let handle = recv.recv().unwrap();
        thread::sleep(Duration::from_millis(30));
        handle.interrupt();
        assert_eq!(join.join().unwrap(), (Err(Blocked::Interrupted), true));
    }
}
