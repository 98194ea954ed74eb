// channel error types.

use thiserror::Error;


// ==== base error types ====


/// Error for using a channel that has been closed
///
/// This is the expected way for a channel's users to learn that it has stopped, rather than a
/// defect. It is returned to parties registering after the close, and delivered to parties that
/// were waiting when it happened.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("channel closed")]
pub struct ClosedError;

/// Error for registering a reader or writer beyond what the channel's variant allows
///
/// For example, a second reader waiting on a channel with a single-reader end. This indicates a
/// logic error in the program and is never retried internally.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("{end} end of channel allows only one party at a time")]
pub struct ArityError {
    /// The end that was over-subscribed
    pub end: End,
}

/// Error for a blocked operation that was woken by interrupting its thread
///
/// The thread's interrupt flag is left set.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("interrupted while blocked")]
pub struct InterruptedError;

/// Error for an operation with no or limited blocking not completing immediately or by the
/// specified deadline
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("operation would block")]
pub struct WouldBlockError;

/// One end of a channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum End {
    /// The end readers use
    Read,
    /// The end writers use
    Write,
}

impl std::fmt::Display for End {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            End::Read => f.write_str("read"),
            End::Write => f.write_str("write"),
        }
    }
}


// ==== compound error types ====


/// Error for a blocking channel operation
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ChannelError {
    /// The channel is closed
    #[error(transparent)]
    Closed(#[from] ClosedError),
    /// The operation would exceed the number of parties the channel's variant allows
    #[error(transparent)]
    Arity(#[from] ArityError),
    /// The thread was interrupted while blocked
    #[error(transparent)]
    Interrupted(#[from] InterruptedError),
}

/// Error for a channel operation with no or limited blocking
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TryChannelError {
    /// The operation failed for a reason other than running out of time
    #[error(transparent)]
    Terminal(#[from] ChannelError),
    /// The operation could not complete immediately or by the specified deadline
    #[error(transparent)]
    WouldBlock(#[from] WouldBlockError),
}

impl From<ClosedError> for TryChannelError {
    fn from(inner: ClosedError) -> Self {
        TryChannelError::Terminal(inner.into())
    }
}

impl From<ArityError> for TryChannelError {
    fn from(inner: ArityError) -> Self {
        TryChannelError::Terminal(inner.into())
    }
}

impl From<InterruptedError> for TryChannelError {
    fn from(inner: InterruptedError) -> Self {
        TryChannelError::Terminal(inner.into())
    }
}
