//! Composes a few layers from `isn` over an in-memory loopback wire and drives one scenario end
//! to end, the counterpart of `ethox-iperf` driving a tap device.

mod config;

use isn::clock::SystemClock;
use isn::dispatch::{Binding, Dispatch};
use isn::error::{Error, Result};
use isn::frame::ShortFrame;
use isn::layer::{proto, Layer, Receiver};
use isn::message::table::{Slot, PRI_NORMAL};
use isn::message::{MessageContext, MessageLayer};

use config::{Config, Scenario};

/// A terminal layer that prints whatever payload reaches it and cannot itself send.
struct Echo(&'static str);

impl Layer for Echo {
    fn recv(&mut self, src: &[u8], _caller: &mut dyn Layer) -> usize {
        println!("{}: received {} bytes: {:?}", self.0, src.len(), src);
        src.len()
    }

    fn sendbuf_available(&mut self, _size: usize) -> usize {
        0
    }

    fn send_with(&mut self, _size: usize, _f: &mut dyn FnMut(&mut [u8]) -> Option<usize>) -> Result<usize> {
        Err(Error::NoRoute)
    }
}

/// The loopback "wire": a physical transport stand-in that just remembers the last packet handed
/// to it, so the demo can immediately feed that back into a receive call.
#[derive(Default)]
struct Wire {
    buf: Vec<u8>,
}

impl Wire {
    fn take(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.buf)
    }
}

impl Layer for Wire {
    fn recv(&mut self, _src: &[u8], _caller: &mut dyn Layer) -> usize {
        0
    }

    fn sendbuf_available(&mut self, size: usize) -> usize {
        size
    }

    fn send_with(&mut self, size: usize, f: &mut dyn FnMut(&mut [u8]) -> Option<usize>) -> Result<usize> {
        let mut scratch = vec![0u8; size];
        match f(&mut scratch) {
            Some(len) => {
                scratch.truncate(len);
                println!("wire: carrying {len} bytes: {:?}", scratch);
                self.buf = scratch;
                Ok(len)
            }
            None => Ok(0),
        }
    }
}

fn run_ping(config: &Config) {
    let clock = SystemClock::new();
    let mut wire = Wire::default();
    let mut echo = Echo("ping");

    {
        let mut frame =
            ShortFrame::new(config.frame_mode.into_short_mode(), &mut echo, None, &mut wire, &clock, config.frame_timeout);
        frame.send(b"hello isn").expect("loopback wire always accepts");
        frame.stats.trace("ping/tx");
    }

    let on_wire = wire.take();
    println!("ping: {} bytes on the wire: {:?}", on_wire.len(), on_wire);

    let mut caller = Wire::default();
    let mut frame =
        ShortFrame::new(config.frame_mode.into_short_mode(), &mut echo, None, &mut wire, &clock, config.frame_timeout);
    let consumed = isn::Layer::recv(&mut frame, &on_wire, &mut caller);
    println!("ping: frame consumed {consumed} of {} bytes", on_wire.len());
    frame.stats.trace("ping/rx");
}

fn run_message() {
    let mut wire = Wire::default();
    let mut counter = 0u8;
    let mut handler = move |ctx: MessageContext, out: &mut [u8]| {
        if let Some(delta) = ctx.input().and_then(|i| i.first()) {
            counter = counter.wrapping_add(*delta);
        } else {
            counter = counter.wrapping_add(1);
        }
        out[0] = counter;
        Some(1)
    };

    let mut slots = [Slot::new(&mut handler, "demo.counter")];
    let mut message = MessageLayer::new(&mut wire, &mut slots);

    message.send(0, PRI_NORMAL);
    message.sched();

    let mut caller = Wire::default();
    let query = [proto::MSG, 0, 5];
    isn::Layer::recv(&mut message, &query, &mut caller);
    message.sched();
}

fn run_dispatch() {
    let mut ping = Echo("dispatch/ping");
    let mut other = Echo("dispatch/other");
    let mut caller = Wire::default();

    let mut bindings = [Binding::new(proto::PING, &mut ping), Binding::other(&mut other)];
    let mut dispatch = Dispatch::new(&mut bindings);

    dispatch.recv(&[proto::PING, 1, 2, 3], &mut caller);
    dispatch.recv(&[proto::USER1, 9], &mut caller);
}

fn main() {
    let config = Config::from_args();
    match config.scenario {
        Scenario::Ping => run_ping(&config),
        Scenario::Message => run_message(),
        Scenario::Dispatch => run_dispatch(),
    }
}
