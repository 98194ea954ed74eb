//! The resource graph: deadlock-free locking of dynamically connected groups of objects.
//!
//! Each [`Resource`] is a vertex. Vertices joined by dependency edges form a group that shares a
//! single lock, owned by the group's current representative. [`ResourceGraph::acquire`] locks the
//! groups of an arbitrary set of resources in increasing representative order, so two callers can
//! never wait on each other in a cycle. The returned [`Manipulator`] is the only way to change the
//! graph.
//!
//! ```
//! use sluice::ResourceGraph;
//!
//! let graph = ResourceGraph::new();
//! let a = graph.new_resource();
//! let b = graph.new_resource();
//!
//! let mut m = graph.acquire([&a, &b]);
//! m.add_dependency(&a, &b);
//! m.release();
//!
//! assert_eq!(graph.representative(&a), graph.representative(&b));
//! ```

mod manipulator;
mod rep;

pub use self::{
    manipulator::Manipulator,
    rep::RepId,
};

use self::rep::{Rep, RepIdMint};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::Relaxed},
        Arc, Condvar, Mutex,
    },
};


/// Tuning for the resource graph
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GraphConfig {
    /// Restarts allowed per requested resource before an acquisition is declared "old"
    pub restart_factor: usize,
    /// Restarts allowed regardless of the number of requested resources
    pub restart_slack: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            restart_factor: 4,
            restart_slack: 8,
        }
    }
}

impl GraphConfig {
    // number of restarts after which an acquisition of n resources becomes old.
    fn restart_threshold(&self, n: usize) -> usize {
        self.restart_factor.saturating_mul(n).saturating_add(self.restart_slack)
    }
}


/// Process-local coordinator of resources and their lock groups
///
/// Cheap to clone; clones refer to the same graph. Channels and selects are constructed against an
/// explicit graph, and resources of different graphs must never be mixed.
#[derive(Clone)]
pub struct ResourceGraph(Arc<Shared>);

struct Shared {
    config: GraphConfig,
    rep_ids: RepIdMint,
    resource_ids: AtomicU64,
    // every resource that has not been removed.
    nodes: DashMap<u64, Arc<Node>>,
    // number of acquisitions currently declared old. new acquisitions wait for this to be zero.
    old_callers: Mutex<usize>,
    old_callers_cond: Condvar,
}

// graph vertex.
pub(crate) struct Node {
    id: u64,
    // some rep in the chain leading to this node's root. replaced wholesale when a split moves the
    // node into a fresh group.
    rep: Mutex<Arc<Rep>>,
    // only read or written while holding this node's root.
    edges: Mutex<SmallVec<[u64; 4]>>,
    // set once, by the manipulator that removes the node.
    removed: AtomicBool,
}

impl Node {
    // resolve the true representative, compressing this node's own pointer.
    pub(crate) fn root(&self) -> Arc<Rep> {
        loop {
            let start = self.rep.lock().unwrap().clone();
            let root = start.root();
            if Arc::ptr_eq(&start, &root) {
                return root;
            }
            let mut slot = self.rep.lock().unwrap();
            // only compress if nobody repointed the node in the meantime
            if Arc::ptr_eq(&*slot, &start) {
                *slot = Arc::clone(&root);
                return root;
            }
        }
    }
}

/// Handle to a vertex of a [`ResourceGraph`]
///
/// Cloning the handle does not create a new vertex.
#[derive(Clone)]
pub struct Resource(pub(crate) Arc<Node>);

impl Resource {
    /// Graph-unique number of this resource, for diagnostics
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Whether this resource has been removed from its graph
    pub fn is_removed(&self) -> bool {
        self.0.removed.load(Relaxed)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Resource({})", self.0.id)
    }
}

impl Default for ResourceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGraph {
    /// Construct an empty graph with default tuning
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Construct an empty graph
    pub fn with_config(config: GraphConfig) -> Self {
        ResourceGraph(Arc::new(Shared {
            config,
            rep_ids: RepIdMint::default(),
            resource_ids: AtomicU64::new(0),
            nodes: DashMap::new(),
            old_callers: Mutex::new(0),
            old_callers_cond: Condvar::new(),
        }))
    }

    /// The tuning this graph was constructed with
    pub fn config(&self) -> GraphConfig {
        self.0.config
    }

    /// Create a new resource in a group of its own
    ///
    /// Its representative's id is larger than that of every representative minted before it.
    pub fn new_resource(&self) -> Resource {
        let id = self.0.resource_ids.fetch_add(1, Relaxed);
        let node = Arc::new(Node {
            id,
            rep: Mutex::new(Rep::new(self.0.rep_ids.mint())),
            edges: Mutex::new(SmallVec::new()),
            removed: AtomicBool::new(false),
        });
        self.0.nodes.insert(id, Arc::clone(&node));
        Resource(node)
    }

    /// Id of the resource's current true representative
    ///
    /// Two resources resolve to the same id exactly when they are in the same group. Without a
    /// [`Manipulator`] covering the resource, the answer may be outdated as soon as it returns.
    pub fn representative(&self, resource: &Resource) -> RepId {
        resource.0.root().id
    }

    /// Number of resources that have not been removed
    pub fn resource_count(&self) -> usize {
        self.0.nodes.len()
    }

    // whether both handles refer to the same graph.
    pub(crate) fn same_graph(&self, other: &ResourceGraph) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of acquisitions currently declared old
    pub fn old_callers(&self) -> usize {
        *self.0.old_callers.lock().unwrap()
    }

    /// Lock the groups of all the given resources
    ///
    /// Blocks until every group is held. Groups are locked in increasing representative order; if
    /// groups merge while this waits, it backs off from the lock it just took and retries. An
    /// acquisition that has to retry too often is declared old, which holds back new
    /// acquisitions until it completes.
    pub fn acquire<'r, I>(&self, resources: I) -> Manipulator
    where
        I: IntoIterator<Item = &'r Resource>,
    {
        let mut remaining: SmallVec<[Arc<Node>; 8]> = SmallVec::new();
        for resource in resources {
            if !remaining.iter().any(|node| Arc::ptr_eq(node, &resource.0)) {
                remaining.push(Arc::clone(&resource.0));
            }
        }

        self.wait_for_old_callers();

        let mut manipulator = Manipulator::new(self.clone());
        let threshold = self.0.config.restart_threshold(remaining.len());
        let mut restarts = 0;
        while !remaining.is_empty() {
            // lock the smallest representative we can see
            let Some(candidate) = remaining.iter()
                .map(|node| node.root())
                .min_by_key(|rep| rep.id)
                else { break };
            candidate.lock();

            // it may have stopped being the smallest (or a root) while we waited for it
            let roots: SmallVec<[Arc<Rep>; 8]> = remaining.iter().map(|node| node.root()).collect();
            let smallest = roots.iter().min_by_key(|rep| rep.id);
            if smallest.is_some_and(|rep| Arc::ptr_eq(rep, &candidate)) {
                let mut i = 0;
                remaining.retain(|_| {
                    let keep = !Arc::ptr_eq(&roots[i], &candidate);
                    i += 1;
                    keep
                });
                manipulator.hold(candidate);
            } else {
                candidate.unlock();
                restarts += 1;
                trace!(rep = %candidate.id, restarts, "resource acquisition restarting");
                if !manipulator.is_old() && restarts > threshold {
                    debug!(restarts, requested = roots.len(), "declaring resource acquisition old");
                    self.declare_old();
                    manipulator.set_old();
                }
            }
        }
        manipulator
    }

    // block while any acquisition is declared old.
    fn wait_for_old_callers(&self) {
        let mut old = self.0.old_callers.lock().unwrap();
        while *old > 0 {
            old = self.0.old_callers_cond.wait(old).unwrap();
        }
    }

    fn declare_old(&self) {
        *self.0.old_callers.lock().unwrap() += 1;
    }

    fn retire_old(&self) {
        let mut old = self.0.old_callers.lock().unwrap();
        *old = old.checked_sub(1).expect("invariant violation: old caller count underflow");
        if *old == 0 {
            self.0.old_callers_cond.notify_all();
        }
    }

    fn mint_rep_locked(&self) -> Arc<Rep> {
        Rep::new_locked(self.0.rep_ids.mint())
    }

    fn node(&self, id: u64) -> Option<Arc<Node>> {
        self.0.nodes.get(&id).map(|node| Arc::clone(node.value()))
    }

    fn forget_node(&self, id: u64) {
        self.0.nodes.remove(&id);
    }
}

impl fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("config", &self.0.config)
            .field("resources", &self.0.nodes.len())
            .finish()
    }
}
