//! Managed-artifact naming rules
//!
//! Every object this driver creates on the appliance carries a well-known
//! prefix so it can be recognized (and reaped) later. The artifact prefix
//! depends on the driver context; these strings mustn't change, or existing
//! deployments would orphan their Flexvols.

use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};

/// Prefix applied to qtrees renamed for asynchronous deletion.
pub const DELETED_QTREE_NAME_PREFIX: &str = "deleted_";

/// The appliance limit on qtree name length, in bytes.
pub const MAX_QTREE_NAME_LENGTH: usize = 64;

/// Execution context the driver was deployed under.
///
/// The context determines the artifact prefix used for all managed object
/// names, which is frozen by legacy compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverContext {
    Docker,
    Kubernetes,
}

impl DriverContext {
    pub fn artifact_prefix(self) -> &'static str {
        match self {
            DriverContext::Docker => "ndvp",
            DriverContext::Kubernetes => "trident",
        }
    }
}

impl std::fmt::Display for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverContext::Docker => write!(f, "docker"),
            DriverContext::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Derive the name prefix shared by all Flexvols this driver manages.
pub fn flexvol_name_prefix(context: DriverContext, storage_prefix: &str) -> String {
    format!(
        "{}_qtree_pool_{}_",
        context.artifact_prefix(),
        storage_prefix
    )
    .replace("__", "_")
}

/// Derive the name of the shared export policy applied to managed Flexvols.
pub fn flexvol_export_policy(context: DriverContext) -> String {
    format!("{}_qtree_pool_export_policy", context.artifact_prefix())
}

/// Derive the name a qtree is given when marked for deletion.
///
/// The renamed form is `deleted_<name>_<5 random alphanumerics>`. If that
/// would exceed the qtree name limit, the original name is truncated from
/// the left so the result always fits.
pub fn deleted_qtree_name(name: &str, entropy: &dyn Entropy) -> String {
    let suffix = entropy.random_string(5);
    let deleted = format!("{}{}_{}", DELETED_QTREE_NAME_PREFIX, name, suffix);
    if deleted.len() <= MAX_QTREE_NAME_LENGTH {
        return deleted;
    }

    let mut cut = DELETED_QTREE_NAME_PREFIX.len() + 10;
    while cut < name.len() && !name.is_char_boundary(cut) {
        cut += 1;
    }
    let trimmed = if cut >= name.len() { "" } else { &name[cut..] };
    format!("{}{}_{}", DELETED_QTREE_NAME_PREFIX, trimmed, suffix)
}

// =============================================================================
// Entropy Source
// =============================================================================

/// Source of randomness for name suffixes and the Flexvol tie-break.
///
/// The only non-determinism in the driver flows through this trait, so tests
/// inject a sequential implementation and assert on exact names.
pub trait Entropy: Send + Sync {
    /// Generate `len` random alphanumeric characters.
    fn random_string(&self, len: usize) -> String;

    /// Pick a uniformly random index in `0..n`. `n` must be non-zero.
    fn pick(&self, n: usize) -> usize;
}

/// Entropy backed by the operating system RNG.
#[derive(Debug, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn random_string(&self, len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn pick(&self, n: usize) -> usize {
        rand::thread_rng().gen_range(0..n)
    }
}

pub type EntropyRef = Arc<dyn Entropy>;

/// Deterministic entropy for tests: suffixes count up, picks are fixed.
#[cfg(test)]
pub(crate) struct SeqEntropy {
    counter: std::sync::atomic::AtomicUsize,
    pick: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl SeqEntropy {
    pub(crate) fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicUsize::new(0),
            pick: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_pick(&self, index: usize) {
        self.pick.store(index, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Entropy for SeqEntropy {
    fn random_string(&self, len: usize) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("{:0>width$}", n, width = len)
    }

    fn pick(&self, n: usize) -> usize {
        self.pick.load(std::sync::atomic::Ordering::SeqCst) % n
    }
}
