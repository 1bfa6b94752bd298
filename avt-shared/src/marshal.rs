//! Wire marshalling traits shared by the RTP and RTCP codecs.
//!
//! Unmarshalling always goes through a [`bytes::Buf`] cursor so every read
//! is bounds-checked against the remaining datagram; a declared length is
//! never trusted before the bytes backing it are known to exist.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Result;

pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

pub trait Marshal: MarshalSize {
    fn marshal_to(&self, buf: &mut impl BufMut) -> Result<usize>;

    fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.marshal_size());
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

pub trait Unmarshal: MarshalSize {
    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self>
    where
        Self: Sized;
}
