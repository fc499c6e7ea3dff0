//! Mirrors an incoming stream to two receivers.
//!
//! No intermediate buffering is done, so if one receiver can only make partial progress while
//! the other fully consumes the data, the slower one loses the remainder of that packet -- any
//! protocol stacked behind a mismatched pair must tolerate that. `dup_errors` counts such
//! divergences for diagnostics; it does not drive any retry or recovery on its own.

use crate::layer::{Layer, Receiver};

/// Duplicates a receive stream across two children.
pub struct Dup<'a> {
    child1: &'a mut dyn Layer,
    child2: &'a mut dyn Layer,
    /// Count of times the two children consumed a different number of bytes from the same call.
    pub dup_errors: u32,
}

impl<'a> Dup<'a> {
    /// Build a duplicator over two children.
    pub fn new(child1: &'a mut dyn Layer, child2: &'a mut dyn Layer) -> Self {
        Dup { child1, child2, dup_errors: 0 }
    }
}

impl<'a> Receiver for Dup<'a> {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        let recv1 = self.child1.recv(src, caller);
        let recv2 = self.child2.recv(src, caller);
        if recv1 != recv2 {
            self.dup_errors += 1;
        }
        recv1.max(recv2)
    }
}
