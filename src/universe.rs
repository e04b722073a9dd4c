//! Resources and the ordered universe a policy selects from.
//!
//! A [`Universe`] is fixed once a policy is initialized. Its insertion order
//! defines round-robin order and index addressing, so it is stored as a
//! shared slice and never reordered.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{DsError, Result};

/// A compute target a policy can hand work to.
///
/// Resources are opaque to the selection runtime: they are cloned into
/// selections and submissions, compared for equality, and otherwise only
/// passed to the callables the caller submits.
pub trait Resource: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> Resource for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Ordered, immutable collection of resources.
///
/// Cloning a universe is cheap (it shares the underlying slice).
#[derive(Clone, Debug, PartialEq)]
pub struct Universe<R> {
    resources: Arc<[R]>,
}

impl<R: Resource> Universe<R> {
    /// Create a universe from resources in selection order.
    pub fn new(resources: impl IntoIterator<Item = R>) -> Self {
        Self {
            resources: resources.into_iter().collect(),
        }
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the universe has no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resource at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&R> {
        self.resources.get(index)
    }

    /// Resource at `index`, failing with `InvalidResourceIndex` when out of range.
    pub fn resource(&self, index: usize) -> Result<&R> {
        self.resources
            .get(index)
            .ok_or(DsError::InvalidResourceIndex {
                index,
                len: self.len(),
            })
    }

    /// Index of the first resource equal to `resource`.
    pub fn position(&self, resource: &R) -> Option<usize> {
        self.resources.iter().position(|r| r == resource)
    }

    /// Iterate over resources in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.resources.iter()
    }

    /// Copy the resources out, in insertion order.
    pub fn to_vec(&self) -> Vec<R> {
        self.resources.to_vec()
    }

    pub fn as_slice(&self) -> &[R] {
        &self.resources
    }
}

impl<R: Resource> From<Vec<R>> for Universe<R> {
    fn from(resources: Vec<R>) -> Self {
        Self {
            resources: resources.into(),
        }
    }
}

impl<R: Resource, const N: usize> From<[R; N]> for Universe<R> {
    fn from(resources: [R; N]) -> Self {
        Self::new(resources)
    }
}

impl<R: Resource> FromIterator<R> for Universe<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a, R: Resource> IntoIterator for &'a Universe<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Marker requesting deferred initialization.
///
/// A policy built from `Deferred` has no universe until
/// [`initialize`](crate::initialize) is called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deferred;

/// How a policy obtains its universe.
#[derive(Clone, Debug)]
pub enum Init<R> {
    /// Universe supplied at construction.
    Eager(Universe<R>),
    /// Universe supplied later through `initialize`.
    Deferred,
}

impl<R: Resource> From<Universe<R>> for Init<R> {
    fn from(universe: Universe<R>) -> Self {
        Init::Eager(universe)
    }
}

impl<R: Resource> From<Vec<R>> for Init<R> {
    fn from(resources: Vec<R>) -> Self {
        Init::Eager(Universe::from(resources))
    }
}

impl<R: Resource, const N: usize> From<[R; N]> for Init<R> {
    fn from(resources: [R; N]) -> Self {
        Init::Eager(Universe::from(resources))
    }
}

impl<R> From<Deferred> for Init<R> {
    fn from(_: Deferred) -> Self {
        Init::Deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_preserves_order() {
        let universe = Universe::from(vec!["gpu0", "gpu1", "cpu"]);
        assert_eq!(universe.len(), 3);
        assert_eq!(universe.to_vec(), vec!["gpu0", "gpu1", "cpu"]);
        assert_eq!(universe.position(&"cpu"), Some(2));
    }

    #[test]
    fn test_resource_out_of_range() {
        let universe: Universe<i32> = [10, 20].into();
        assert_eq!(*universe.resource(1).unwrap(), 20);
        match universe.resource(2) {
            Err(DsError::InvalidResourceIndex { index, len }) => {
                assert_eq!(index, 2);
                assert_eq!(len, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_clone_shares_storage() {
        let universe: Universe<u8> = (0..4).collect();
        let cloned = universe.clone();
        assert!(std::ptr::eq(universe.as_slice(), cloned.as_slice()));
    }

    #[test]
    fn test_init_conversions() {
        let eager: Init<i32> = vec![1, 2].into();
        assert!(matches!(eager, Init::Eager(ref u) if u.len() == 2));

        let deferred: Init<i32> = Deferred.into();
        assert!(matches!(deferred, Init::Deferred));
    }
}
