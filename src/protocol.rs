//! Binary add protocol frame codec.
//!
//! Two fixed-size little-endian frames, no length prefix, no versioning:
//!
//! ```text
//! Request:  [id: u32][a: i32][b: i32]   (12 bytes)
//! Response: [id: u32][sum: i32]         (8 bytes)
//! ```
//!
//! The protocol is strictly synchronous per connection: one response per
//! request, in order. The `id` is informational only.

use bytes::{Buf, BufMut};

/// Size of an encoded request frame.
pub const REQUEST_LEN: usize = 12;

/// Size of an encoded response frame.
pub const RESPONSE_LEN: usize = 8;

/// Size of a session I/O buffer, large enough for either frame.
pub const FRAME_BUFFER_LEN: usize = if REQUEST_LEN > RESPONSE_LEN {
    REQUEST_LEN
} else {
    RESPONSE_LEN
};

/// A request to add two numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub id: u32,
    pub a: i32,
    pub b: i32,
}

impl Request {
    pub fn new(id: u32, a: i32, b: i32) -> Self {
        Self { id, a, b }
    }

    /// Encode into the first `REQUEST_LEN` bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut out = &mut buf[..REQUEST_LEN];
        out.put_u32_le(self.id);
        out.put_i32_le(self.a);
        out.put_i32_le(self.b);
    }

    /// Decode from the first `REQUEST_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Self {
        let mut input = &buf[..REQUEST_LEN];
        Self {
            id: input.get_u32_le(),
            a: input.get_i32_le(),
            b: input.get_i32_le(),
        }
    }

    /// Compute the response. Overflow wraps like native i32 addition.
    pub fn answer(&self) -> Response {
        Response {
            id: self.id,
            sum: self.a.wrapping_add(self.b),
        }
    }
}

/// The sum of a request's operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub id: u32,
    pub sum: i32,
}

impl Response {
    pub fn new(id: u32, sum: i32) -> Self {
        Self { id, sum }
    }

    /// Encode into the first `RESPONSE_LEN` bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        let mut out = &mut buf[..RESPONSE_LEN];
        out.put_u32_le(self.id);
        out.put_i32_le(self.sum);
    }

    /// Decode from the first `RESPONSE_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Self {
        let mut input = &buf[..RESPONSE_LEN];
        Self {
            id: input.get_u32_le(),
            sum: input.get_i32_le(),
        }
    }
}

/// Answer the request held in `buf`, overwriting its first `RESPONSE_LEN`
/// bytes with the response frame.
///
/// The `id` slot stays where it is and the `a` slot becomes `sum`; the `b`
/// slot is left behind and never written to the wire.
pub fn respond_in_place(buf: &mut [u8; FRAME_BUFFER_LEN]) -> Response {
    let response = Request::decode(buf).answer();
    response.encode(buf);
    response
}
