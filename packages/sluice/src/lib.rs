//! CSP-style channels and multi-way select for preemptive threads.
//!
//! Every channel and every in-flight select owns a vertex in a [`ResourceGraph`]. Connected groups
//! of vertices share one lock, and [`ResourceGraph::acquire`] takes any set of those locks in a
//! globally consistent order, which is what lets a select register on many channels at once
//! without deadlocking against other selects.
//!
//! ```no_run
//! use sluice::{Alt, Channel, ResourceGraph};
//!
//! let graph = ResourceGraph::new();
//! let ch = Channel::<u32>::one_one(&graph);
//! let (rx, tx) = (ch.read_end(), ch.write_end());
//!
//! std::thread::spawn(move || tx.write(3).unwrap());
//! let got = Alt::new(&graph)
//!     .add_read_branch(&rx, |n| n * 2)
//!     .select()
//!     .unwrap();
//! assert_eq!(got, 6);
//! ```

#[macro_use]
extern crate tracing;

pub mod graph;
pub mod task;
pub mod util;

mod alt;
mod channel;
mod polling;

pub use crate::{
    alt::{Alt, Guard, Start},
    channel::api::*,
    channel::policy::{Arity, Buffering, ClosePolicy, Policy},
    graph::{GraphConfig, Manipulator, RepId, Resource, ResourceGraph},
};

/// Error types
pub mod error {
    pub use crate::{
        alt::AltError,
        channel::error::*,
    };
}

/// Future types
pub mod future {
    pub use crate::channel::api::future::*;
}
