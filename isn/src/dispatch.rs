//! Routes a decoded packet to one of several children based on its leading protocol tag byte.
//!
//! Fully transparent: the tag byte is inspected but not stripped, and the matched child sees
//! the packet exactly as received. Frame-family tags (`0x80` and above) are folded to a single
//! match value before comparison, since routing never needs to tell short framing apart from
//! compact, long, or jumbo framing -- see [`crate::layer::proto::FRAME`].

use crate::layer::{proto, Layer, Receiver};
use crate::managed::Slice;

/// Matches any protocol tag not claimed by an earlier binding. Put last in the list.
pub const OTHER: i16 = -1;

/// A single protocol tag bound to the layer that should receive packets carrying it.
pub struct Binding<'a> {
    protocol: i16,
    child: &'a mut dyn Layer,
}

impl<'a> Binding<'a> {
    /// Bind a specific protocol tag to a child layer.
    pub fn new(protocol: u8, child: &'a mut dyn Layer) -> Self {
        Binding { protocol: protocol as i16, child }
    }

    /// Bind the catch-all fallback to a child layer.
    pub fn other(child: &'a mut dyn Layer) -> Self {
        Binding { protocol: OTHER, child }
    }
}

/// Dispatches incoming packets to one of several children by their leading tag byte.
///
/// If no binding matches and no [`Binding::other`] catch-all was provided, the packet is
/// acknowledged as consumed and silently discarded -- a raw tag byte nobody subscribed to is
/// not corruption, just an uninteresting packet on a shared bus.
pub struct Dispatch<'a> {
    bindings: Slice<'a, Binding<'a>>,
}

impl<'a> Dispatch<'a> {
    /// Build a dispatcher over a fixed set of bindings, checked in order.
    pub fn new(bindings: &'a mut [Binding<'a>]) -> Self {
        Dispatch { bindings: Slice::Borrowed(bindings) }
    }

    fn fold_tag(byte: u8) -> i16 {
        if byte >= proto::FRAME { proto::FRAME as i16 } else { byte as i16 }
    }

}

impl<'a> Receiver for Dispatch<'a> {
    /// Route `src` to whichever binding matches its leading tag, returning the bytes consumed.
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        let tag = match src.first() {
            Some(&tag) => tag,
            None => return 0,
        };
        let protocol = Self::fold_tag(tag);

        for binding in self.bindings.as_mut_slice() {
            if binding.protocol == protocol || binding.protocol == OTHER {
                return binding.child.recv(src, caller);
            }
        }
        // No route: the packet is still well-formed, just unaddressed. Ack it silently.
        src.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(usize);

    impl Layer for Counting {
        fn recv(&mut self, src: &[u8], _caller: &mut dyn Layer) -> usize {
            self.0 += 1;
            src.len()
        }

        fn sendbuf_available(&mut self, _size: usize) -> usize {
            0
        }

        fn send_with(
            &mut self,
            _size: usize,
            _f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
        ) -> crate::error::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn routes_to_matching_binding() {
        let mut user1 = Counting(0);
        let mut msg = Counting(0);
        let mut caller = Counting(0);
        {
            let bindings: [Binding; 2] =
                [Binding::new(proto::USER1, &mut user1), Binding::new(proto::MSG, &mut msg)];
            let mut bindings = bindings;
            let mut dispatch = Dispatch::new(&mut bindings);
            let consumed = dispatch.recv(&[proto::MSG, 1, 2], &mut caller);
            assert_eq!(consumed, 3);
        }
        assert_eq!(user1.0, 0);
        assert_eq!(msg.0, 1);
    }

    #[test]
    fn frame_family_tags_fold_to_one_match() {
        let mut frames = Counting(0);
        let mut caller = Counting(0);
        {
            let bindings: [Binding; 1] = [Binding::new(proto::FRAME, &mut frames)];
            let mut bindings = bindings;
            let mut dispatch = Dispatch::new(&mut bindings);
            dispatch.recv(&[0xC2, 0, 0], &mut caller);
            dispatch.recv(&[0xFF, 0, 0], &mut caller);
        }
        assert_eq!(frames.0, 2);
    }

    #[test]
    fn unmatched_protocol_is_acked_and_discarded() {
        let mut msg = Counting(0);
        let mut caller = Counting(0);
        let bindings: [Binding; 1] = [Binding::new(proto::MSG, &mut msg)];
        let mut bindings = bindings;
        let mut dispatch = Dispatch::new(&mut bindings);
        let consumed = dispatch.recv(&[proto::USER1, 9], &mut caller);
        assert_eq!(consumed, 2);
        assert_eq!(msg.0, 0);
    }

    #[test]
    fn other_catches_unmatched_protocol() {
        let mut fallback = Counting(0);
        let mut caller = Counting(0);
        let bindings: [Binding; 1] = [Binding::other(&mut fallback)];
        let mut bindings = bindings;
        let mut dispatch = Dispatch::new(&mut bindings);
        dispatch.recv(&[proto::USER1, 9], &mut caller);
        assert_eq!(fallback.0, 1);
    }
}
