//! Storage containers that work the same whether or not an allocator is available.
//!
//! Every layer in this crate that needs a list -- a dispatch binding table, a message slot table
//! -- needs to work both on a host build with `alloc` and on a microcontroller with only a fixed
//! array. These types let the call site pick, without the layer logic caring which one it got.

mod partial;
mod slice;

pub use partial::Partial;
pub use slice::Slice;
