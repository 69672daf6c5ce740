//! # Command Frames
//!
//! A [`Command`] is one write to the device's control characteristic: an
//! opcode byte followed by a fixed- or variable-length payload. There is no
//! ack-matching id; the link is ordered and single-outstanding.

use serde::{Deserialize, Serialize};

/// One outbound command frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Command { opcode, payload }
    }

    /// Wire bytes: `[opcode, payload...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.payload.len());
        buf.push(self.opcode);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_bytes_prefixes_opcode() {
        let cmd = Command::new(0xc3, vec![0x02]);
        assert_eq!(cmd.to_bytes(), vec![0xc3, 0x02]);
    }
}
