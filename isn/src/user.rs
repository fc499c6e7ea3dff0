//! Prepends (or strips, on receive) a single protocol tag byte identifying a user-defined stream.
//!
//! The thinnest possible layer: one byte of header, no framing, no checksum. Typically stacked
//! directly on a [`crate::frame`] layer or a transport so that several independent user
//! protocols can share one physical link, picked apart by [`crate::dispatch::Dispatch`] on the
//! way in.

use crate::error::Result;
use crate::layer::Layer;

/// Tags outgoing packets with `user_id` and strips/matches it on incoming ones.
pub struct User<'a> {
    child: &'a mut dyn Layer,
    parent: &'a mut dyn Layer,
    user_id: u8,
}

impl<'a> User<'a> {
    /// Build a user layer identified by `user_id` (one of [`crate::layer::proto::USER1`] through
    /// [`crate::layer::proto::USER15`]).
    pub fn new(child: &'a mut dyn Layer, parent: &'a mut dyn Layer, user_id: u8) -> Self {
        User { child, parent, user_id }
    }
}

impl<'a> Layer for User<'a> {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        match src.first() {
            Some(&tag) if tag == self.user_id => {
                let consumed = self.child.recv(&src[1..], caller);
                if consumed > 0 {
                    consumed + 1
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    fn sendbuf_available(&mut self, size: usize) -> usize {
        self.parent.sendbuf_available(size + 1).saturating_sub(1)
    }

    fn send_with(
        &mut self,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize> {
        let user_id = self.user_id;
        self.parent.send_with(size + 1, &mut |buf| {
            if buf.is_empty() {
                return None;
            }
            let written = f(&mut buf[1..])?;
            buf[0] = user_id;
            Some(written + 1)
        })
    }
}
