// the knobs that distinguish channel variants. the matching engine is the same for all of them.

use super::error::End;


/// How many parties may wait on one end of a channel at a time
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Arity {
    /// At most one waiting party; a second registration is an arity error
    One,
    /// Any number of waiting parties, served in registration order
    Many,
}

/// How many written messages a channel accepts before writers block
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Buffering {
    /// Every write waits for a reader
    Unbuffered,
    /// Up to this many writes complete immediately and wait in the channel for a reader
    Bounded(usize),
    /// Every write completes immediately
    ///
    /// Memory use grows without bound if readers fall behind. Only use this when something else
    /// limits how far ahead writers can get.
    Unbounded,
}

impl Buffering {
    // whether a buffer holding n messages can take one more.
    pub(crate) fn has_room(self, n: usize) -> bool {
        match self {
            Buffering::Unbuffered => false,
            Buffering::Bounded(cap) => n < cap,
            Buffering::Unbounded => true,
        }
    }
}

/// Which half-closes fully close a channel
///
/// Closing an end that only one party can use at a time closes the whole channel: there is no one
/// else left on that side. Closing an end shared by many parties does nothing; only a full close
/// stops such a channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ClosePolicy {
    /// Whether closing the read end closes the channel
    pub read_end_closes: bool,
    /// Whether closing the write end closes the channel
    pub write_end_closes: bool,
}

impl ClosePolicy {
    /// The close policy that goes with the given reader and writer arities
    pub const fn for_arities(readers: Arity, writers: Arity) -> Self {
        ClosePolicy {
            read_end_closes: matches!(readers, Arity::One),
            write_end_closes: matches!(writers, Arity::One),
        }
    }

    pub(crate) fn closes_on(&self, end: End) -> bool {
        match end {
            End::Read => self.read_end_closes,
            End::Write => self.write_end_closes,
        }
    }
}

/// Full description of a channel variant
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Policy {
    /// Reader arity
    pub readers: Arity,
    /// Writer arity
    pub writers: Arity,
    /// Write buffering
    pub buffering: Buffering,
    /// Half-close behavior
    pub closing: ClosePolicy,
}

impl Policy {
    /// One reader, one writer, no buffering; either half-close closes it
    pub const ONE_ONE: Policy = Policy::unbuffered(Arity::One, Arity::One);
    /// Many readers, one writer, no buffering; closing the write end closes it
    pub const ONE_MANY: Policy = Policy::unbuffered(Arity::Many, Arity::One);
    /// One reader, many writers, no buffering; closing the read end closes it
    pub const MANY_ONE: Policy = Policy::unbuffered(Arity::One, Arity::Many);
    /// Many readers, many writers, no buffering; only a full close closes it
    pub const MANY_MANY: Policy = Policy::unbuffered(Arity::Many, Arity::Many);

    const fn unbuffered(readers: Arity, writers: Arity) -> Self {
        Policy {
            readers,
            writers,
            buffering: Buffering::Unbuffered,
            closing: ClosePolicy::for_arities(readers, writers),
        }
    }

    /// Buffered channel with any number of writers
    pub const fn buffered(readers: Arity, capacity: usize) -> Self {
        Policy {
            readers,
            writers: Arity::Many,
            buffering: Buffering::Bounded(capacity),
            closing: ClosePolicy::for_arities(readers, Arity::Many),
        }
    }

    /// Channel whose writes never block, with any number of writers
    ///
    /// See [`Buffering::Unbounded`] for the memory caveat.
    pub const fn unbounded(readers: Arity) -> Self {
        Policy {
            readers,
            writers: Arity::Many,
            buffering: Buffering::Unbounded,
            closing: ClosePolicy::for_arities(readers, Arity::Many),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy::ONE_ONE
    }
}
