//! Data structures for carrying identities and values across the engine's
//! type-erased boundary.
//!
//! Ids and values keep their concrete types everywhere except the two places
//! that must mix sources: the batch combiner and the cache. `DynKey` and
//! `DynValue` carry them through those with equality, hashing, and debug
//! formatting forwarded to the concrete type underneath.

use std::any::{Any, TypeId};
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Object-safe view of an identity value.
trait KeyLike: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_key(&self, other: &dyn KeyLike) -> bool;
    fn hash_key(&self, state: &mut dyn Hasher);
    fn fmt_key(&self, f: &mut Formatter<'_>) -> fmt::Result;
}

impl<T> KeyLike for T
where
    T: Any + Eq + Hash + Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_key(&self, other: &dyn KeyLike) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn hash_key(&self, mut state: &mut dyn Hasher) {
        // Keys of different types must not collide just because their bytes
        // hash alike.
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn fmt_key(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A type-erased source identity. Equality and hashing match the underlying
/// concrete id, so erased keys behave exactly like their typed originals in
/// maps and sets.
#[derive(Clone)]
pub struct DynKey(Arc<dyn KeyLike>);

impl DynKey {
    pub fn new<T>(id: T) -> Self
    where
        T: Any + Eq + Hash + Debug + Send + Sync,
    {
        DynKey(Arc::new(id))
    }

    /// Borrow the underlying id, if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl PartialEq for DynKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_key(&*other.0)
    }
}

impl Eq for DynKey {}

impl Hash for DynKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_key(state)
    }
}

impl Debug for DynKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt_key(f)
    }
}

/// Object-safe view of a fetched value.
trait ValueLike: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn fmt_value(&self, f: &mut Formatter<'_>) -> fmt::Result;
}

impl<T> ValueLike for T
where
    T: Any + Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn fmt_value(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A type-erased fetched value, as stored in the cache. Cloning shares the
/// underlying allocation; the concrete type is recovered by cloning out.
#[derive(Clone)]
pub struct DynValue(Arc<dyn ValueLike>);

impl DynValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Debug + Send + Sync,
    {
        DynValue(Arc::new(value))
    }

    /// A copy of the underlying value, if it is a `T`.
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.0.as_any().downcast_ref::<T>().cloned()
    }
}

impl Debug for DynValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt_value(f)
    }
}
