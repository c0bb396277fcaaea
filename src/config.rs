//! Recognized configuration options (spec §6): the oracle bound, the mOPE node capacity, and
//! backend selection. All three are mandatory -- there is no sensible default for `l` (it's a
//! tradeoff between round count and per-round leakage that only the deployer can make), so
//! [`Config::new`] always requires the caller to state it explicitly.
//!

use crate::Error;

/// Which backend a [`Client`](crate::Client) should route its operations to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The buffer B-tree that reveals order lazily as queries demand it.
    Pope,
    /// The balanced B-tree with a mutable, order-preserving integer encoding per key.
    Mope,
    /// The decrypt-eagerly reference index. Not a deployable choice; see [`crate::Cheater`].
    Cheater,
}

/// The tunables spec §6 calls "recognized options".
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// The oracle's bound on local (non-streaming) storage: at most this many ciphertexts may
    /// be handed to the oracle in a single round. Typical values are 5-100; must be at least 2,
    /// since a partition or split with fewer than two haystack slots can't make progress.
    l: usize,
    /// mOPE node capacity. The original fixes this at 4; this crate keeps it tunable in the
    /// 2..=16 range the spec permits.
    maxlen: usize,
    /// Which backend a client should talk to.
    backend: BackendKind,
}

impl Config {
    /// Validate and construct a new `Config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationError`] if `l < 2` or `maxlen` is outside `2..=16`.
    pub fn new(l: usize, maxlen: usize, backend: BackendKind) -> Result<Config, Error> {
        if l < 2 {
            return Err(Error::OperationError(format!(
                "oracle bound `l` must be at least 2, got {l}"
            )));
        }
        if !(2..=16).contains(&maxlen) {
            return Err(Error::OperationError(format!(
                "mOPE `maxlen` must be between 2 and 16 inclusive, got {maxlen}"
            )));
        }
        Ok(Config { l, maxlen, backend })
    }

    /// The oracle bound `L`.
    pub fn l(&self) -> usize {
        self.l
    }

    /// The mOPE node capacity.
    pub fn maxlen(&self) -> usize {
        self.maxlen
    }

    /// The selected backend.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}
