//! Task utility.

use crate::task::Task;
use std::io;


/// Wrapper around a daemon task that interrupts it if dropped.
///
/// The task's thread is detached rather than joined, so a body that returns promptly once
/// interrupted is cleaned up without the owner waiting for it.
pub struct InterruptOnDrop(Task);

impl InterruptOnDrop {
    /// Schedule a task as a daemon and wrap with self.
    pub fn schedule(task: Task) -> io::Result<Self> {
        let mut task = task.daemon(true);
        task.schedule()?;
        Ok(InterruptOnDrop(task))
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.interrupt();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::task;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn dropping_interrupts_task() {
        let (send, recv) = mpsc::channel();
        let guard = InterruptOnDrop::schedule(Task::new(move || {
            send.send(task::sleep(Duration::from_secs(60))).unwrap();
        })).unwrap();
        drop(guard);
        assert!(recv.recv_timeout(Duration::from_secs(10)).unwrap().is_err());
    }
}
