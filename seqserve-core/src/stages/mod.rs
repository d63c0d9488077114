//! Single-purpose stages surrounding batch composition.

mod apply;
mod codec;
mod flatten;

pub use apply::ModelApplier;
pub use codec::{decode, encode, Decoder, Encoder};
pub use flatten::Flattener;
