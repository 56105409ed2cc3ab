use std::fmt;
use std::ops::{Deref, DerefMut};

/// Hides a field from `{:?}` output.
///
/// Used for the guest memory buffer, which is far too large to print, and for
/// the boxed I/O bus, whose trait has no `Debug` bound.
pub struct NoDebug<T>(pub T);

impl<T> fmt::Debug for NoDebug<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("..")
    }
}

impl<T> Deref for NoDebug<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for NoDebug<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
