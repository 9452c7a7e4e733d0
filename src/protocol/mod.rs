//! Protocol Layer: encoding of values stored in the ring

mod codec;

pub use codec::XorCodec;
