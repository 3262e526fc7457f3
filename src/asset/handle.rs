use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed index into an [`AssetCache`](super::AssetCache).
pub struct Handle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls so `Handle<T>` is Copy/Eq/Hash without bounds on T
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

impl<T> Handle<T> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NotHashable;

    #[test]
    fn handle_is_copy() {
        let h1: Handle<String> = Handle::new(5);
        let h2 = h1;
        let h3 = h1;
        assert_eq!(h1.index(), h2.index());
        assert_eq!(h1.index(), h3.index());
    }

    #[test]
    fn handles_compare_without_bounds_on_target() {
        use std::collections::HashSet;
        let mut set: HashSet<Handle<NotHashable>> = HashSet::new();
        set.insert(Handle::new(1));
        set.insert(Handle::new(1));
        set.insert(Handle::new(2));
        assert_eq!(set.len(), 2);
    }
}
