//! Envelope types and the fixed-size wire codec
//!
//! One radio datagram carries exactly one envelope. There is no framing and
//! no partial frames: a buffer whose length differs from [`FRAME_SIZE`] is
//! not an envelope.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────┬──────┬──────────┬──────────────┬──────────┬──────────┬───────────────┐
//! │ Type │ Rsvd │ Msg ID   │ Network name │ Target   │ Sender   │ Payload       │
//! │ (1B) │ (1B) │ (2B, LE) │ (20B, NUL)   │ (6B)     │ (6B)     │ (200B, NUL)   │
//! └──────┴──────┴──────────┴──────────────┴──────────┴──────────┴───────────────┘
//!  0      1      2          4              24         30         36          236
//! ```
//!
//! The reserved byte mirrors the alignment padding of the C struct used by
//! existing firmware, so frames are byte-compatible with it.

use super::address::NodeAddress;
use crate::error::{ConfigError, FrameError, MeshError};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum network name length in characters
pub const NETWORK_NAME_CAPACITY: usize = 19;

/// Maximum payload length in bytes
pub const PAYLOAD_CAPACITY: usize = 199;

/// Serialized envelope size in bytes
pub const FRAME_SIZE: usize = 236;

const TYPE_OFFSET: usize = 0;
const ID_OFFSET: usize = 2;
const NAME_OFFSET: usize = 4;
const NAME_FIELD: usize = NETWORK_NAME_CAPACITY + 1;
const TARGET_OFFSET: usize = NAME_OFFSET + NAME_FIELD;
const SENDER_OFFSET: usize = TARGET_OFFSET + NodeAddress::LEN;
const PAYLOAD_OFFSET: usize = SENDER_OFFSET + NodeAddress::LEN;
const PAYLOAD_FIELD: usize = PAYLOAD_CAPACITY + 1;

const _: () = assert!(PAYLOAD_OFFSET + PAYLOAD_FIELD == FRAME_SIZE);

/// Envelope message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Flooded to every node
    Broadcast = 1,
    /// Addressed to one node, best effort
    Unicast = 2,
    /// Addressed to one node, end-to-end confirmation requested
    UnicastWithConfirm = 3,
    /// End-to-end confirmation travelling back to the sender
    DeliveryConfirmResponse = 4,
    /// Flooded route discovery request
    SearchRequest = 5,
    /// Flooded route discovery answer
    SearchResponse = 6,
}

impl MessageType {
    /// Create from the wire tag
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Broadcast),
            2 => Some(MessageType::Unicast),
            3 => Some(MessageType::UnicastWithConfirm),
            4 => Some(MessageType::DeliveryConfirmResponse),
            5 => Some(MessageType::SearchRequest),
            6 => Some(MessageType::SearchResponse),
            _ => None,
        }
    }

    /// Wire tag
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Types that travel by flooding rather than along a route
    pub fn is_flooded(self) -> bool {
        matches!(
            self,
            MessageType::Broadcast | MessageType::SearchRequest | MessageType::SearchResponse
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Broadcast => "BROADCAST",
            MessageType::Unicast => "UNICAST",
            MessageType::UnicastWithConfirm => "UNICAST_WITH_CONFIRM",
            MessageType::DeliveryConfirmResponse => "DELIVERY_CONFIRM_RESPONSE",
            MessageType::SearchRequest => "SEARCH_REQUEST",
            MessageType::SearchResponse => "SEARCH_RESPONSE",
        };
        f.write_str(name)
    }
}

/// Network partition name, at most 19 printable ASCII characters.
///
/// An empty name accepts envelopes from every network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkName {
    len: u8,
    bytes: [u8; NETWORK_NAME_CAPACITY],
}

impl NetworkName {
    /// Validate and store a network name
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        if name.len() > NETWORK_NAME_CAPACITY {
            return Err(ConfigError::InvalidNetworkName(format!(
                "{:?} is longer than {} characters",
                name, NETWORK_NAME_CAPACITY
            )));
        }
        Self::from_wire(name.as_bytes()).ok_or_else(|| {
            ConfigError::InvalidNetworkName(format!("{:?} is not printable ASCII", name))
        })
    }

    /// Name that accepts every network
    pub fn any() -> Self {
        Self::default()
    }

    fn from_wire(raw: &[u8]) -> Option<Self> {
        if raw.len() > NETWORK_NAME_CAPACITY || !raw.iter().all(|b| (b' '..=b'~').contains(b)) {
            return None;
        }
        let mut bytes = [0u8; NETWORK_NAME_CAPACITY];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            len: raw.len() as u8,
            bytes,
        })
    }

    /// Name as a string slice
    pub fn as_str(&self) -> &str {
        // constructors only admit printable ASCII
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    /// Check if the name is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether a node configured with this name processes `other`
    pub fn accepts(&self, other: &NetworkName) -> bool {
        self.is_empty() || self == other
    }
}

impl TryFrom<String> for NetworkName {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NetworkName::new(&value)
    }
}

impl From<NetworkName> for String {
    fn from(name: NetworkName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkName({:?})", self.as_str())
    }
}

/// Envelope payload, at most 199 bytes, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    len: u8,
    bytes: [u8; PAYLOAD_CAPACITY],
}

impl Payload {
    /// Maximum payload size in bytes
    pub const MAX_SIZE: usize = PAYLOAD_CAPACITY;

    /// Validate and copy a payload.
    ///
    /// Oversize input and input containing NUL bytes are rejected rather
    /// than truncated.
    pub fn new(data: &[u8]) -> Result<Self, MeshError> {
        if data.len() > PAYLOAD_CAPACITY {
            return Err(MeshError::PayloadTooLarge {
                len: data.len(),
                max: PAYLOAD_CAPACITY,
            });
        }
        if let Some(pos) = data.iter().position(|&b| b == 0) {
            return Err(MeshError::PayloadContainsNul(pos));
        }
        let mut bytes = [0u8; PAYLOAD_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    /// Empty payload, as carried by control frames
    pub fn empty() -> Self {
        Self {
            len: 0,
            bytes: [0u8; PAYLOAD_CAPACITY],
        }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl TryFrom<&[u8]> for Payload {
    type Error = MeshError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Payload::new(value)
    }
}

impl TryFrom<&str> for Payload {
    type Error = MeshError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Payload::new(value.as_bytes())
    }
}

/// The routable message unit exchanged over the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Dispatch tag
    pub message_type: MessageType,
    /// Random per-envelope id for duplicate suppression
    pub message_id: u16,
    /// Network partition filter
    pub network_name: NetworkName,
    /// Ultimate recipient, unchanged across hops
    pub target: NodeAddress,
    /// Ultimate originator, unchanged across hops
    pub sender: NodeAddress,
    /// Application data (empty for control frames)
    pub payload: Payload,
}

impl Envelope {
    /// Create an envelope
    pub fn new(
        message_type: MessageType,
        message_id: u16,
        network_name: NetworkName,
        target: NodeAddress,
        sender: NodeAddress,
        payload: Payload,
    ) -> Self {
        Self {
            message_type,
            message_id,
            network_name,
            target,
            sender,
            payload,
        }
    }

    /// Serialize to the fixed-size wire frame
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut frame = [0u8; FRAME_SIZE];
        frame[TYPE_OFFSET] = self.message_type.as_byte();
        LittleEndian::write_u16(&mut frame[ID_OFFSET..ID_OFFSET + 2], self.message_id);

        let name = self.network_name.as_str().as_bytes();
        frame[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);

        frame[TARGET_OFFSET..TARGET_OFFSET + NodeAddress::LEN]
            .copy_from_slice(self.target.as_bytes());
        frame[SENDER_OFFSET..SENDER_OFFSET + NodeAddress::LEN]
            .copy_from_slice(self.sender.as_bytes());

        let payload = self.payload.as_bytes();
        frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        frame
    }

    /// Deserialize from a received buffer
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != FRAME_SIZE {
            return Err(FrameError::WrongLength {
                expected: FRAME_SIZE,
                actual: bytes.len(),
            });
        }

        let message_type = MessageType::from_byte(bytes[TYPE_OFFSET])
            .ok_or(FrameError::UnknownMessageType(bytes[TYPE_OFFSET]))?;
        let message_id = LittleEndian::read_u16(&bytes[ID_OFFSET..ID_OFFSET + 2]);

        let name = terminated(&bytes[NAME_OFFSET..NAME_OFFSET + NAME_FIELD], "network name")?;
        let network_name = NetworkName::from_wire(name).ok_or(FrameError::InvalidNetworkName)?;

        let target = read_address(&bytes[TARGET_OFFSET..TARGET_OFFSET + NodeAddress::LEN]);
        let sender = read_address(&bytes[SENDER_OFFSET..SENDER_OFFSET + NodeAddress::LEN]);

        let data = terminated(&bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + PAYLOAD_FIELD], "payload")?;
        let mut payload = Payload::empty();
        payload.bytes[..data.len()].copy_from_slice(data);
        payload.len = data.len() as u8;

        Ok(Self {
            message_type,
            message_id,
            network_name,
            target,
            sender,
            payload,
        })
    }

    /// Check if this envelope was originated by `address`
    pub fn originated_by(&self, address: NodeAddress) -> bool {
        self.sender == address
    }

    /// Check if this envelope is ultimately addressed to `address`
    pub fn is_for(&self, address: NodeAddress) -> bool {
        self.target == address
    }
}

/// Content of a C-style string field, up to its first NUL
fn terminated<'a>(field: &'a [u8], name: &'static str) -> Result<&'a [u8], FrameError> {
    field
        .iter()
        .position(|&b| b == 0)
        .map(|end| &field[..end])
        .ok_or(FrameError::UnterminatedField(name))
}

fn read_address(bytes: &[u8]) -> NodeAddress {
    let mut raw = [0u8; NodeAddress::LEN];
    raw.copy_from_slice(bytes);
    NodeAddress::from_bytes(raw)
}

/// Envelope awaiting transmission, with the radio-layer destination for
/// this hop
#[derive(Debug, Clone, Copy)]
pub struct OutgoingEntry {
    pub envelope: Envelope,
    /// Immediate radio destination (broadcast for flooded frames)
    pub next_hop: NodeAddress,
    /// Earliest time (ms) the frame may be handed to the transport
    pub not_before: u64,
}

/// Envelope received and awaiting dispatch
#[derive(Debug, Clone, Copy)]
pub struct IncomingEntry {
    pub envelope: Envelope,
    /// Node that actually handed us the frame
    pub previous_hop: NodeAddress,
}

/// Envelope parked until a route to its target is learned
#[derive(Debug, Clone, Copy)]
pub struct WaitingEntry {
    pub envelope: Envelope,
    pub next_hop: NodeAddress,
    /// Time (ms) the entry was parked
    pub enqueued_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> Envelope {
        Envelope::new(
            MessageType::UnicastWithConfirm,
            0xBEEF,
            NetworkName::new("gardennet").unwrap(),
            NodeAddress::from_bytes([0xA8, 0x48, 0xFA, 0xDC, 0xBB, 0xCD]),
            NodeAddress::from_bytes([0x24, 0x0A, 0xC4, 0x00, 0x11, 0x22]),
            Payload::new(b"Hello world!").unwrap(),
        )
    }

    #[test]
    fn test_frame_layout() {
        let frame = sample_envelope().encode();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(frame[0], 3);
        assert_eq!(frame[1], 0);
        assert_eq!(&frame[2..4], &[0xEF, 0xBE]);
        assert_eq!(&frame[4..13], b"gardennet");
        assert_eq!(frame[13], 0);
        assert_eq!(&frame[24..30], &[0xA8, 0x48, 0xFA, 0xDC, 0xBB, 0xCD]);
        assert_eq!(&frame[30..36], &[0x24, 0x0A, 0xC4, 0x00, 0x11, 0x22]);
        assert_eq!(&frame[36..48], b"Hello world!");
        assert_eq!(frame[48], 0);
    }

    #[test]
    fn test_decode_recovers_envelope() {
        let envelope = sample_envelope();
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.payload.as_bytes(), b"Hello world!");
    }

    #[test]
    fn test_decode_wrong_length() {
        let frame = sample_envelope().encode();
        assert_eq!(
            Envelope::decode(&frame[..FRAME_SIZE - 1]),
            Err(FrameError::WrongLength {
                expected: FRAME_SIZE,
                actual: FRAME_SIZE - 1
            })
        );
        let mut long = frame.to_vec();
        long.push(0);
        assert!(matches!(
            Envelope::decode(&long),
            Err(FrameError::WrongLength { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut frame = sample_envelope().encode();
        frame[0] = 9;
        assert_eq!(
            Envelope::decode(&frame),
            Err(FrameError::UnknownMessageType(9))
        );
    }

    #[test]
    fn test_decode_ignores_bytes_after_terminator() {
        let mut frame = sample_envelope().encode();
        // firmware leaves stale memory behind the terminator
        frame[20] = b'X';
        frame[200] = 0x7F;
        let decoded = Envelope::decode(&frame).unwrap();
        assert_eq!(decoded.network_name.as_str(), "gardennet");
        assert_eq!(decoded.payload.as_bytes(), b"Hello world!");
    }

    #[test]
    fn test_decode_unterminated_payload() {
        let mut frame = sample_envelope().encode();
        for byte in &mut frame[PAYLOAD_OFFSET..] {
            *byte = b'a';
        }
        assert_eq!(
            Envelope::decode(&frame),
            Err(FrameError::UnterminatedField("payload"))
        );
    }

    #[test]
    fn test_max_payload_fits() {
        let data = [b'x'; PAYLOAD_CAPACITY];
        let mut envelope = sample_envelope();
        envelope.payload = Payload::new(&data).unwrap();
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded.payload.len(), PAYLOAD_CAPACITY);
    }

    #[test]
    fn test_payload_rejects_oversize_and_nul() {
        let data = [b'x'; PAYLOAD_CAPACITY + 1];
        assert!(matches!(
            Payload::new(&data),
            Err(MeshError::PayloadTooLarge { len: 200, max: 199 })
        ));
        assert!(matches!(
            Payload::new(b"ab\0cd"),
            Err(MeshError::PayloadContainsNul(2))
        ));
    }

    #[test]
    fn test_network_name_bounds() {
        assert!(NetworkName::new("nineteen-characters").is_ok());
        assert!(NetworkName::new("twenty---characters!").is_err());
        assert!(NetworkName::new("tab\tname").is_err());
        assert!(NetworkName::new("").unwrap().is_empty());
    }

    #[test]
    fn test_network_name_accepts() {
        let any = NetworkName::any();
        let home = NetworkName::new("home").unwrap();
        let work = NetworkName::new("work").unwrap();
        assert!(any.accepts(&home));
        assert!(home.accepts(&home));
        assert!(!home.accepts(&work));
        assert!(!home.accepts(&any));
    }

    #[test]
    fn test_network_name_serde() {
        let name: NetworkName = serde_json::from_str("\"gardennet\"").unwrap();
        assert_eq!(name.as_str(), "gardennet");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"gardennet\"");
        assert!(serde_json::from_str::<NetworkName>("\"this name is far too long\"").is_err());
    }

    #[test]
    fn test_message_type_tags() {
        for byte in 1..=6u8 {
            let ty = MessageType::from_byte(byte).unwrap();
            assert_eq!(ty.as_byte(), byte);
        }
        assert!(MessageType::from_byte(0).is_none());
        assert!(MessageType::Broadcast.is_flooded());
        assert!(MessageType::SearchResponse.is_flooded());
        assert!(!MessageType::DeliveryConfirmResponse.is_flooded());
    }
}
