//! Framed TCP transport between adjacent roles and between sibling servers.

pub mod parallel;
pub mod tcp;

/// Matches the original's buffer/poll sizing: large enough that a batch of
/// offline ciphers or online queries rarely needs more than one or two
/// socket round trips.
pub const BUFFER_SIZE: usize = 140_000;
/// Cap on outstanding unacknowledged bytes during a bounded send/poll drive
/// (the original's `SendAndPoll`).
pub const POLL_RATE: usize = 140_000;

/// How many `item_size`-byte items may be sent to siblings before a sender
/// must pause and drain a read, so outstanding bytes stay within
/// [`POLL_RATE`].
pub fn poll_rate(item_size: usize) -> usize {
    (POLL_RATE / item_size).max(1)
}
