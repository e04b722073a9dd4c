//! Function keys identify recurring workloads for per-workload tuning.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Identifies a logically distinct, recurring unit of work.
///
/// Keys are supplied by the caller. Reuse the same key every time the same
/// workload is submitted so that its timing history accumulates in one place;
/// two different workloads should never share a key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct FunctionKey(pub u64);

impl FunctionKey {
    /// Create a function key from a type.
    ///
    /// Every closure has its own type, so this gives one key per call site:
    /// ```ignore
    /// let key = FunctionKey::of::<MyKernel>();
    /// ```
    pub fn of<T: 'static>() -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<T>().hash(&mut hasher);
        FunctionKey(hasher.finish())
    }

    /// Create a function key from the type of a value, typically a closure.
    ///
    /// ```ignore
    /// let kernel = |q: ComputeQueue| q.submit(|| work());
    /// let key = FunctionKey::of_val(&kernel);
    /// ```
    pub fn of_val<T: 'static>(_value: &T) -> Self {
        Self::of::<T>()
    }

    /// Create a function key from a string identifier.
    ///
    /// Useful when the key must be stable across runs:
    /// ```ignore
    /// let key = FunctionKey::from_name("gemm");
    /// ```
    pub fn from_name(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        FunctionKey(hasher.finish())
    }
}

impl From<u64> for FunctionKey {
    fn from(raw: u64) -> Self {
        FunctionKey(raw)
    }
}

impl std::fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
