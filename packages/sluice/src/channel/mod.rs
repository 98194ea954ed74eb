// implementation of the channel.
//
// every variant (reader and writer arity, buffering, half-close behavior) runs through the same
// matching engine, parameterized by a Policy. the architecture is as such:
//
// channel handles wrap around Arc<Core>
//                                 |
//          /----------------------/
//          v
//        core
//          |
//          |------ it owns a vertex in the resource graph. its state may only be touched while
//          |       holding that vertex's group, which is also what lets a select lock many
//          |       channels at once.
//          |
//          |------ it contains a queue of waiting readers and a queue of waiting writers. each
//          |       entry is the promise half of a oneshot, fulfilled by the engine when the entry
//          |       is matched or the channel closes. entries are withdrawn by ticket.
//          |
//          \------ buffered messages sit in a deque that logically precedes the writer queue.
//                  their writers were already told the write completed ("dummy writers").
//
// blocking versions of operations are built as a layer on top of the futures, using the polling
// module at the crate root.
//
// the organization of these modules is as such:
//
//      ticket_queue<-------core: the matching engine. presents a safe but panicky abstraction
//                   |      ^     that takes a manipulator as proof that the caller holds the
//      waiter<------/      |     channel's resource.
//                          |
//      policy<-------------api: a wrapper around core that acquires the resource and waits on
//                               the outcome. the crate re-exports this API publicly.
//
// the alt module drives the same core directly, with branch-flavored notifications.

pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod policy;
pub(crate) mod ticket_queue;
pub(crate) mod waiter;
