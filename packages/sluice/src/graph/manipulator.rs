// capability handle over the groups an acquisition holds.

use super::{rep::Rep, Node, Resource, ResourceGraph};
use smallvec::SmallVec;
use std::{
    collections::HashSet,
    fmt,
    mem::take,
    sync::{atomic::Ordering::Relaxed, Arc},
};


/// Exclusive access to the groups of a set of resources
///
/// Obtained from [`ResourceGraph::acquire`]. While it is alive, the holder may mutate any resource
/// in a held group. Releasing it (explicitly or by dropping it) lets other acquisitions proceed;
/// once released it is gone, so it cannot be used again.
///
/// Operating on a resource outside the held groups is a bug in the caller and panics.
pub struct Manipulator {
    graph: ResourceGraph,
    // locked reps: the roots we acquired, plus roots that lost a merge or were minted by a split.
    held: SmallVec<[Arc<Rep>; 4]>,
    // resources whose connectivity may have shrunk since the last split pass.
    dirty: SmallVec<[u64; 8]>,
    // whether this acquisition is counted in the graph's old caller count.
    old: bool,
    released: bool,
}

impl Manipulator {
    pub(super) fn new(graph: ResourceGraph) -> Self {
        Manipulator {
            graph,
            held: SmallVec::new(),
            dirty: SmallVec::new(),
            old: false,
            released: false,
        }
    }

    pub(super) fn hold(&mut self, rep: Arc<Rep>) {
        self.held.push(rep);
    }

    pub(super) fn set_old(&mut self) {
        self.old = true;
    }

    /// Whether this acquisition restarted often enough to be declared old
    pub fn is_old(&self) -> bool {
        self.old
    }

    /// The graph this was acquired from
    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Whether the resource is in one of the held groups
    pub fn holds(&self, resource: &Resource) -> bool {
        self.covers(&resource.0)
    }

    fn covers(&self, node: &Node) -> bool {
        let root = node.root();
        self.held.iter().any(|rep| Arc::ptr_eq(rep, &root))
    }

    fn assert_covers(&self, resource: &Resource) {
        assert!(
            self.covers(&resource.0),
            "invariant violation: {:?} is not held by this manipulator",
            resource,
        );
    }

    /// Ids of the resources directly connected to this one
    pub fn neighbors(&self, resource: &Resource) -> Vec<u64> {
        self.assert_covers(resource);
        resource.0.edges.lock().unwrap().to_vec()
    }

    /// Add an edge between two held resources, merging their groups
    ///
    /// The merged group keeps the larger of the two representatives. Connecting a resource to
    /// itself, or adding an edge that already exists, does nothing.
    pub fn add_dependency(&mut self, a: &Resource, b: &Resource) {
        self.assert_covers(a);
        self.assert_covers(b);
        if a == b {
            return;
        }
        assert!(
            !a.is_removed() && !b.is_removed(),
            "invariant violation: dependency on a removed resource",
        );

        {
            let mut a_edges = a.0.edges.lock().unwrap();
            if !a_edges.contains(&b.0.id) {
                a_edges.push(b.0.id);
                b.0.edges.lock().unwrap().push(a.0.id);
            }
        }

        let a_root = a.0.root();
        let b_root = b.0.root();
        if !Arc::ptr_eq(&a_root, &b_root) {
            let (smaller, larger) =
                if a_root.id < b_root.id { (a_root, b_root) } else { (b_root, a_root) };
            trace!(child = %smaller.id, parent = %larger.id, "merging resource groups");
            smaller.attach_under(&larger);
        }
    }

    /// Remove the edge between two held resources, if any
    ///
    /// The groups are not split immediately; the resulting connectivity is worked out once, when
    /// this manipulator is released.
    pub fn remove_dependency(&mut self, a: &Resource, b: &Resource) {
        self.assert_covers(a);
        self.assert_covers(b);
        let removed = {
            let mut a_edges = a.0.edges.lock().unwrap();
            let before = a_edges.len();
            a_edges.retain(|id| *id != b.0.id);
            before != a_edges.len()
        };
        if removed {
            b.0.edges.lock().unwrap().retain(|id| *id != a.0.id);
            self.dirty.push(a.0.id);
            self.dirty.push(b.0.id);
        }
    }

    /// Strip every edge of a held resource and drop it from the graph
    ///
    /// The handle stays usable for acquisition (it resolves to a group of its own) but can no
    /// longer be connected to anything. Removing twice does nothing.
    pub fn remove_resource(&mut self, resource: &Resource) {
        self.assert_covers(resource);
        if resource.0.removed.swap(true, Relaxed) {
            return;
        }

        let edges = take(&mut *resource.0.edges.lock().unwrap());
        for id in edges {
            if let Some(neighbor) = self.graph.node(id) {
                neighbor.edges.lock().unwrap().retain(|n| *n != resource.0.id);
            }
            self.dirty.push(id);
        }
        self.graph.forget_node(resource.0.id);

        // detach from the old group so that later acquisitions of a stale handle don't contend
        let rep = self.graph.mint_rep_locked();
        *resource.0.rep.lock().unwrap() = Arc::clone(&rep);
        self.held.push(rep);
    }

    /// Release all held groups
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.split_dirty();
        for rep in self.held.drain(..) {
            rep.unlock();
        }
        if self.old {
            self.graph.retire_old();
        }
    }

    // give every connected part of a group that fell apart its own representative, except the
    // largest part, which keeps the old one.
    fn split_dirty(&mut self) {
        if self.dirty.is_empty() {
            return;
        }

        // every part of a group that could have split off contains a dirty resource, so walking
        // outward from the dirty resources finds them all.
        let mut visited = HashSet::new();
        let mut groups: Vec<(Arc<Rep>, Vec<Vec<Arc<Node>>>)> = Vec::new();
        for id in take(&mut self.dirty) {
            if !visited.insert(id) {
                continue;
            }
            let Some(start) = self.graph.node(id) else { continue };

            let mut part = Vec::new();
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for &neighbor in node.edges.lock().unwrap().iter() {
                    if visited.insert(neighbor) {
                        if let Some(neighbor) = self.graph.node(neighbor) {
                            stack.push(neighbor);
                        }
                    }
                }
                part.push(node);
            }

            let root = part[0].root();
            match groups.iter_mut().find(|(rep, _)| Arc::ptr_eq(rep, &root)) {
                Some((_, parts)) => parts.push(part),
                None => groups.push((root, vec![part])),
            }
        }

        for (root, mut parts) in groups {
            if parts.len() < 2 {
                continue;
            }
            let largest = parts.iter()
                .enumerate()
                .max_by_key(|(_, part)| part.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            parts.swap_remove(largest);
            debug!(rep = %root.id, split_off = parts.len(), "splitting resource group");
            for part in parts {
                let rep = self.graph.mint_rep_locked();
                for node in part {
                    *node.rep.lock().unwrap() = Arc::clone(&rep);
                }
                self.held.push(rep);
            }
        }
    }
}

impl Drop for Manipulator {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for Manipulator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Manipulator")
            .field("held", &self.held.iter().map(|rep| rep.id).collect::<Vec<_>>())
            .field("old", &self.old)
            .finish()
    }
}
