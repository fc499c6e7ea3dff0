//! Crate-wide error type.

/// A shortened result type for a generic layer operation.
pub type Result<T> = core::result::Result<T, Error>;

/// An error type for layer operations.
///
/// These variants explicitly do not capture per-packet corruption (a bad CRC or an unknown
/// message slot is recorded in a [`crate::layer::Stats`] counter and the packet dropped, it does
/// not unwind as an `Error`). This type is for conditions that prevent the operation from being
/// attempted at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// No buffer is available right now; try again later.
    ///
    /// Returned by `getsendbuf` when the requested size exceeds what the chain can currently
    /// provide, e.g. because a previous send buffer from the same layer has not been consumed
    /// yet, or because the underlying transport is backed up.
    WouldBlock,

    /// The requested size could not be satisfied by any configuration of the chain.
    ///
    /// Unlike `WouldBlock` this will not resolve by retrying; the caller asked for more than the
    /// smallest framing overhead in the chain allows.
    BadSize,

    /// No route exists for the given protocol tag, port, or message slot.
    NoRoute,
}
