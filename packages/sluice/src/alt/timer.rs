// the after branch's timer.

use super::cell::{Activation, AltCell};
use crate::{
    graph::{Resource, ResourceGraph},
    task::{self, Task},
    util::InterruptOnDrop,
};
use std::{io, sync::Arc, time::Duration};


// start a timer that claims the select for its after branch once the delay elapses, unless
// something else claims it first. dropping the returned guard stops the timer.
pub(super) fn start(
    graph: &ResourceGraph,
    own: &Resource,
    cell: &Arc<AltCell>,
    delay: Duration,
) -> io::Result<InterruptOnDrop> {
    let graph = graph.clone();
    let own = own.clone();
    let cell = Arc::clone(cell);
    let task = Task::new(move || {
        if task::sleep(delay).is_err() {
            // the select finished some other way
            return;
        }
        let manip = graph.acquire([&own]);
        if cell.claim(Activation::After) {
            trace!(resource = own.id(), ?delay, "select timer fired");
        }
        manip.release();
    });
    InterruptOnDrop::schedule(task.name("sluice-alt-timer"))
}
