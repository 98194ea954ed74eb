// representatives: the union-find layer of the resource graph.
//
// every resource points (possibly through a chain of parents) at the root representative of its
// connected group. holding a root's exclusive lock grants the right to mutate every resource and
// edge in the group.
//
// the ordering invariant everything rests on: a representative's parent always has a strictly
// larger id. merges only ever attach the smaller-id root under the larger-id root, and new
// representatives are minted from a global counter, so the ids attached to any given resource only
// ever increase over time.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Condvar, Mutex,
    },
};


/// Representative id
///
/// Ids are minted from a per-graph counter, are never reused, and totally order representatives.
/// The counter is 64 bits wide, which does not wrap within any realistic process lifetime.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RepId(pub(crate) u64);

impl fmt::Display for RepId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rep#{}", self.0)
    }
}

// mints representative ids in strictly increasing order.
#[derive(Default)]
pub(crate) struct RepIdMint(AtomicU64);

impl RepIdMint {
    pub(crate) fn mint(&self) -> RepId {
        RepId(self.0.fetch_add(1, Relaxed))
    }
}

// group leader.
pub(crate) struct Rep {
    pub(crate) id: RepId,
    // none iff this is currently a root. only transitions from none to some while the lock of
    // both this rep and the new parent are held. path compression may later move it further up
    // the chain, never down.
    parent: Mutex<Option<Arc<Rep>>>,
    lock: RepLock,
}

impl Rep {
    pub(crate) fn new(id: RepId) -> Arc<Self> {
        Arc::new(Rep {
            id,
            parent: Mutex::new(None),
            lock: RepLock::default(),
        })
    }

    // mint a rep that is already locked by the caller.
    pub(crate) fn new_locked(id: RepId) -> Arc<Self> {
        let rep = Rep::new(id);
        rep.lock();
        rep
    }

    // block until this rep's exclusive lock is acquired.
    pub(crate) fn lock(&self) {
        self.lock.lock();
    }

    // release this rep's exclusive lock. the releasing thread need not be the locking thread.
    pub(crate) fn unlock(&self) {
        self.lock.unlock();
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.lock().unwrap().is_none()
    }

    // make self a child of other. caller must hold both locks, and both must be roots.
    pub(crate) fn attach_under(self: &Arc<Self>, other: &Arc<Rep>) {
        assert!(self.id < other.id, "invariant violation: merge would invert representative order");
        let mut parent = self.parent.lock().unwrap();
        debug_assert!(parent.is_none(), "invariant violation: merging a non-root representative");
        debug_assert!(other.is_root(), "invariant violation: merging under a non-root representative");
        *parent = Some(Arc::clone(other));
    }

    // follow parents to the current root, compressing the path on the way back.
    pub(crate) fn root(self: &Arc<Self>) -> Arc<Rep> {
        let mut root = Arc::clone(self);
        loop {
            let next = root.parent.lock().unwrap().clone();
            match next {
                Some(next) => root = next,
                None => break,
            }
        }

        // compress. a parent is only ever replaced by something further up the same chain, which
        // we can tell apart by id since ids strictly increase towards the root.
        let mut curr = Arc::clone(self);
        while !Arc::ptr_eq(&curr, &root) {
            let next = {
                let mut parent = curr.parent.lock().unwrap();
                let Some(next) = parent.clone() else { break };
                if next.id < root.id {
                    *parent = Some(Arc::clone(&root));
                }
                next
            };
            curr = next;
        }
        root
    }
}

impl fmt::Debug for Rep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rep").field("id", &self.id).finish_non_exhaustive()
    }
}

// exclusive lock which is not tied to a guard lifetime, so that a manipulator may carry it around
// and release it later.
#[derive(Default)]
struct RepLock {
    held: Mutex<bool>,
    cond: Condvar,
}

impl RepLock {
    fn lock(&self) {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.cond.wait(held).unwrap();
        }
        *held = true;
    }

    fn unlock(&self) {
        let mut held = self.held.lock().unwrap();
        debug_assert!(*held, "invariant violation: unlocking a representative that is not held");
        *held = false;
        self.cond.notify_one();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn root_follows_larger_ids() {
        let mint = RepIdMint::default();
        let a = Rep::new_locked(mint.mint());
        let b = Rep::new_locked(mint.mint());
        let c = Rep::new_locked(mint.mint());
        a.attach_under(&b);
        b.attach_under(&c);
        assert_eq!(a.root().id, c.id);
        assert_eq!(b.root().id, c.id);
        assert!(c.is_root());

        // compression pointed a directly at c
        assert_eq!(a.parent.lock().unwrap().as_ref().unwrap().id, c.id);
        // and resolution stays idempotent
        assert_eq!(a.root().id, a.root().id);
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn attach_under_smaller_panics() {
        let mint = RepIdMint::default();
        let a = Rep::new_locked(mint.mint());
        let b = Rep::new_locked(mint.mint());
        b.attach_under(&a);
    }

    #[test]
    fn lock_released_from_other_thread() {
        let rep = Rep::new_locked(RepIdMint::default().mint());
        let rep_2 = Arc::clone(&rep);
        let join = thread::spawn(move || {
            rep_2.lock();
            rep_2.unlock();
        });
        thread::sleep(Duration::from_millis(30));
        assert!(!join.is_finished());
        rep.unlock();
        join.join().unwrap();
    }
}
