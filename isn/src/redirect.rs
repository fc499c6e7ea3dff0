//! Copies an incoming stream to a target layer, or loops it back to whoever sent it.
//!
//! A pure receiver: it asks the target for a send buffer sized to the incoming packet, copies the
//! packet into it, and sends. If the target can only offer a smaller buffer, the packet is
//! dropped unless fragmenting was explicitly enabled, in which case the first part that fits is
//! forwarded and the caller is expected to resend the remainder through retry logic of its own.

use crate::layer::{Layer, Receiver};

/// Redirects a receive stream to a target layer.
///
/// [`Redirect::loopback`] builds the special case where `target` is absent and every packet is
/// instead sent back out through whichever layer called [`Receiver::recv`] -- the same object
/// acting as both source and destination, one hop removed.
pub struct Redirect<'a> {
    target: Option<&'a mut dyn Layer>,
    en_fragment: bool,
    /// Bytes successfully copied to the target.
    pub tx_counter: u32,
    /// Times the target could not offer a large enough buffer and the packet was dropped.
    pub tx_retries: u32,
}

impl<'a> Redirect<'a> {
    /// Redirect every received packet to `target`.
    pub fn new(target: &'a mut dyn Layer) -> Self {
        Redirect { target: Some(target), en_fragment: false, tx_counter: 0, tx_retries: 0 }
    }

    /// Redirect every received packet back to whichever layer delivered it.
    pub fn loopback() -> Self {
        Redirect { target: None, en_fragment: false, tx_counter: 0, tx_retries: 0 }
    }

    /// Allow forwarding a truncated prefix of a packet when the target's buffer is smaller than
    /// the incoming packet, instead of dropping it outright.
    pub fn enable_fragmenting(&mut self) {
        self.en_fragment = true;
    }
}

impl<'a> Receiver for Redirect<'a> {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        let en_fragment = self.en_fragment;
        let target: &mut dyn Layer = match &mut self.target {
            Some(target) => &mut **target,
            None => caller,
        };

        let sent = target.send_with(src.len(), &mut |buf| {
            if buf.len() >= src.len() {
                buf[..src.len()].copy_from_slice(src);
                Some(src.len())
            } else if en_fragment && !buf.is_empty() {
                let n = buf.len();
                buf.copy_from_slice(&src[..n]);
                Some(n)
            } else {
                None
            }
        });

        match sent {
            Ok(n) if n > 0 => {
                self.tx_counter += n as u32;
                n
            }
            _ => {
                self.tx_retries += 1;
                0
            }
        }
    }
}
