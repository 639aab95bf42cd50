//! Node hardware addresses
//!
//! Every node is identified by the 6-byte hardware address of its radio.
//! The text form is 12 uppercase hex digits without separators, which is
//! what appears in logs and on the command line.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a [`NodeAddress`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    /// Wrong number of hex digits (separators excluded)
    #[error("expected 12 hex digits, found {0}")]
    InvalidLength(usize),

    /// A character that is not a hex digit
    #[error("invalid hex digit {found:?} at position {position}")]
    InvalidDigit { position: usize, found: char },
}

/// 6-byte radio hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeAddress([u8; 6]);

impl NodeAddress {
    /// Address length in bytes
    pub const LEN: usize = 6;

    /// Broadcast address (all 0xFF)
    pub const BROADCAST: NodeAddress = NodeAddress([0xFF; 6]);

    /// Unset address (all 0x00)
    pub const UNSPECIFIED: NodeAddress = NodeAddress([0x00; 6]);

    /// Create an address from raw bytes
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        NodeAddress(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Generate a random locally administered unicast address
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 6];
        rng.fill(&mut bytes);
        // locally administered, unicast
        bytes[0] = (bytes[0] | 0x02) & 0xFE;
        NodeAddress(bytes)
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Check if this is unset
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Canonical text form: 12 uppercase hex digits
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Parse the text form.
    ///
    /// Accepts upper or lower case and ignores `:` and `-` separators, so
    /// `a8:48:fa:dc:bb:cd` and `A848FADCBBCD` name the same node.
    pub fn from_text(text: &str) -> Result<Self, AddressParseError> {
        let digits: Vec<(usize, char)> = text
            .trim()
            .char_indices()
            .filter(|(_, c)| *c != ':' && *c != '-')
            .collect();

        if digits.len() != Self::LEN * 2 {
            return Err(AddressParseError::InvalidLength(digits.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, pair) in digits.chunks(2).enumerate() {
            let high = hex_value(pair[0])?;
            let low = hex_value(pair[1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(NodeAddress(bytes))
    }
}

fn hex_value((position, c): (usize, char)) -> Result<u8, AddressParseError> {
    c.to_digit(16)
        .map(|d| d as u8)
        .ok_or(AddressParseError::InvalidDigit { position, found: c })
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", self)
    }
}

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_text(s)
    }
}

impl From<[u8; 6]> for NodeAddress {
    fn from(bytes: [u8; 6]) -> Self {
        NodeAddress(bytes)
    }
}
