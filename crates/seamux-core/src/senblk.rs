//! The sentence block: one sentence in flight
//!
//! A `SenBlk` is a fixed-capacity copy of one framed sentence tagged
//! with the endpoint that produced it. Blocks move through the system
//! by value; whoever holds one owns it, and dropping it releases the
//! slot. The source tag is a plain id, never a reference, so a block
//! can outlive its producer without dangling.

use std::fmt;

use seamux_nmea::SENMAX;

use crate::endpoint::EndpointId;

/// One sentence plus its source endpoint.
#[derive(Clone, Copy)]
pub struct SenBlk {
    data: [u8; SENMAX],
    len: usize,
    src: EndpointId,
}

impl SenBlk {
    /// Build a block from framed sentence bytes.
    ///
    /// Returns `None` when the sentence exceeds [`SENMAX`]; the framer
    /// already enforces the bound, so this only guards direct callers.
    pub fn new(bytes: &[u8], src: EndpointId) -> Option<Self> {
        if bytes.len() > SENMAX {
            return None;
        }
        let mut data = [0u8; SENMAX];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            data,
            len: bytes.len(),
            src,
        })
    }

    /// The sentence bytes, terminator included.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the block carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Id of the endpoint that produced this sentence.
    pub fn src(&self) -> EndpointId {
        self.src
    }
}

impl fmt::Debug for SenBlk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenBlk")
            .field("src", &self.src)
            .field("data", &String::from_utf8_lossy(self.bytes()).trim_end())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let blk = SenBlk::new(b"$HELLO*00\r\n", EndpointId(1)).unwrap();
        assert_eq!(blk.bytes(), b"$HELLO*00\r\n");
        assert_eq!(blk.len(), 11);
        assert_eq!(blk.src(), EndpointId(1));
    }

    #[test]
    fn rejects_oversized_payload() {
        let long = vec![b'X'; SENMAX + 1];
        assert!(SenBlk::new(&long, EndpointId(1)).is_none());
        let max = vec![b'X'; SENMAX];
        assert!(SenBlk::new(&max, EndpointId(1)).is_some());
    }
}
