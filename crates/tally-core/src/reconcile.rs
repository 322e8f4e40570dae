//! Last-writer-wins reconciliation between a stored item and an incoming version.
//!
//! Two clocks are involved. `mt` is assigned by the client on every local
//! write. `st` is assigned by the authority when it accepts a version and is
//! strictly increasing per key; `st == 0` means the version is still local.
//!
//! The rules, applied per item:
//!
//! 1. No stored version: accept.
//! 2. Both versions confirmed (`st > 0`): accept iff the incoming `st` is larger.
//! 3. Otherwise: accept iff the incoming `mt` is at least the stored `mt`.
//!
//! Rule 3 uses `>=` so that the authority's echo of a local write, which
//! carries the same `mt` plus a fresh `st`, replaces the pending local copy.

/// Anything carrying the two reconciliation timestamps.
pub trait Versioned {
    fn key(&self) -> &str;
    fn mt(&self) -> i64;
    fn st(&self) -> f64;
}

/// Outcome of comparing an incoming version against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Decides whether `incoming` supersedes `current`.
pub fn decide<T: Versioned>(current: Option<&T>, incoming: &T) -> Verdict {
    let Some(current) = current else {
        return Verdict::Accept;
    };

    let accept = if current.st() > 0.0 && incoming.st() > 0.0 {
        incoming.st() > current.st()
    } else {
        incoming.mt() >= current.mt()
    };

    if accept {
        Verdict::Accept
    } else {
        Verdict::Reject
    }
}
