use std::fmt;

use rand::Rng;

use crate::attributes::*;
use crate::error::*;

// MAGIC_COOKIE is fixed value that aids in distinguishing STUN packets
// from packets of other protocols when STUN is multiplexed with those
// other protocols on the same port.
//
// The magic cookie field MUST contain the fixed value 0x2112A442 in
// network byte order.
//
// Defined in "STUN Message Structure", section 6.
pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;
pub const MESSAGE_HEADER_SIZE: usize = 20;

// TRANSACTION_ID_SIZE is length of transaction id array (in bytes).
pub const TRANSACTION_ID_SIZE: usize = 12; // 96 bit

// Interfaces that are implemented by message attributes, shorthands for them,
// or helpers for message fields as type or transaction id.
pub trait Setter {
    // Setter sets *Message attribute.
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

// Getter parses attribute from *Message.
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// is_message returns true if b looks like STUN message.
/// Useful for multiplexing. is_message does not guarantee
/// that decoding will be successful.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// new returns new random transaction ID.
    pub fn new() -> Self {
        let mut b = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::thread_rng().fill(&mut b.0);
        b
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex_string(&self.0))
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

/// MessageClass is 8-bit representation of 2-bit class of STUN Message Class.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct MessageClass(pub u8);

/// CLASS_REQUEST describes a request method type.
pub const CLASS_REQUEST: MessageClass = MessageClass(0x00);
/// CLASS_INDICATION describes indication.
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01);
/// CLASS_SUCCESS_RESPONSE describes success response.
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02);
/// CLASS_ERROR_RESPONSE describes error response.
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };
        write!(f, "{s}")
    }
}

/// Method is uint16 representation of 12-bit STUN method.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Method(pub u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = format!("0x{:x}", self.0);
        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => unknown.as_str(),
        };
        write!(f, "{s}")
    }
}

// Bit shifts and masks to pack a method and class into the 14 usable bits
// of the message type field. Defined in RFC 5389 Section 6.
const METHOD_A_BITS: u16 = 0xf; // 0b0000000000001111
const METHOD_B_BITS: u16 = 0x70; // 0b0000000001110000
const METHOD_D_BITS: u16 = 0xf80; // 0b0000111110000000

const METHOD_B_SHIFT: u16 = 1;
const METHOD_D_SHIFT: u16 = 2;

const FIRST_BIT: u16 = 0x1;
const SECOND_BIT: u16 = 0x2;

const C0_BIT: u16 = FIRST_BIT;
const C1_BIT: u16 = SECOND_BIT;

const CLASS_C0_SHIFT: u16 = 4;
const CLASS_C1_SHIFT: u16 = 7;

/// MessageType is STUN Message Type Field.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct MessageType {
    /// e.g. binding
    pub method: Method,
    /// e.g. request
    pub class: MessageClass,
}

/// Common STUN message types.
/// Binding request message type.
pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
/// Binding success response message type
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
/// Binding error response message type.
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};
/// Binding indication message type.
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_INDICATION,
};

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

impl Setter for MessageType {
    /// add_to sets m type to t.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    /// value returns bit representation of messageType.
    pub fn value(&self) -> u16 {
        // 0                 1
        // 2  3  4 5 6 7 8 9 0 1 2 3 4 5
        // +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
        // |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
        // |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
        // +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
        let method = self.method.0;
        let a = method & METHOD_A_BITS;
        let b = method & METHOD_B_BITS;
        let d = method & METHOD_D_BITS;
        let method = a + (b << METHOD_B_SHIFT) + (d << METHOD_D_SHIFT);

        let c = self.class.0 as u16;
        let c0 = (c & C0_BIT) << CLASS_C0_SHIFT;
        let c1 = (c & C1_BIT) << CLASS_C1_SHIFT;
        let class = c0 + c1;

        method + class
    }

    /// read_value decodes uint16 into MessageType.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0_SHIFT) & C0_BIT;
        let c1 = (value >> CLASS_C1_SHIFT) & C1_BIT;
        self.class = MessageClass((c0 + c1) as u8);

        let a = value & METHOD_A_BITS;
        let b = (value >> METHOD_B_SHIFT) & METHOD_B_BITS;
        let d = (value >> METHOD_D_SHIFT) & METHOD_D_BITS;
        self.method = Method(a + b + d);
    }
}

const DEFAULT_RAW_CAPACITY: usize = 120;

/// Message represents a single STUN packet. It uses aggressive internal
/// buffering to enable zero-allocation encoding and decoding,
/// so there are some usage constraints:
///
/// ```text
/// Message, its fields, results of m.get or any attribute a.get_from
/// are valid only until Message.raw is not modified.
/// ```
#[derive(Default, Debug, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32, // len(raw) not including header
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id,
        )
    }
}

// Equal returns true if Message b equals to m. Ignores m.raw.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.transaction_id == other.transaction_id
            && self.length == other.length
            && self.attributes == other.attributes
    }
}

impl Setter for Message {
    /// add_to sets b.transaction_id to m.transaction_id.
    ///
    /// Implements Setter to aid in crafting responses.
    fn add_to(&self, b: &mut Message) -> Result<()> {
        b.transaction_id = self.transaction_id;
        b.write_transaction_id();
        Ok(())
    }
}

impl Message {
    /// new returns Message with pre-allocated raw.
    pub fn new() -> Self {
        Message {
            raw: {
                let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
                raw.extend_from_slice(&[0; MESSAGE_HEADER_SIZE]);
                raw
            },
            ..Default::default()
        }
    }

    /// marshal_binary returns the wire representation.
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        // We can't return m.raw, allocation is expected by implicit interface
        // contract induced by other implementations.
        Ok(self.raw.clone())
    }

    /// unmarshal_binary decodes data into the message, copying it.
    pub fn unmarshal_binary(&mut self, data: &[u8]) -> Result<()> {
        // We can't retain data, copy is expected by interface contract.
        self.raw.clear();
        self.raw.extend_from_slice(data);
        self.decode()
    }

    /// new_transaction_id sets m.transaction_id to a random value.
    pub fn new_transaction_id(&mut self) -> Result<()> {
        self.transaction_id = TransactionId::new();
        self.write_transaction_id();
        Ok(())
    }

    /// reset resets Message, attributes and underlying buffer length.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.length = 0;
        self.attributes.0.clear();
    }

    /// grow ensures that internal buffer has n length.
    fn grow(&mut self, n: usize, resize: bool) {
        if self.raw.len() >= n {
            if resize {
                self.raw.resize(n, 0);
            }
            return;
        }
        self.raw.extend_from_slice(&vec![0; n - self.raw.len()]);
    }

    /// add appends new attribute to message.
    ///
    /// Value of attribute is copied to internal buffer so
    /// it is safe to reuse v.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        // Allocating buffer for TLV (type-length-value).
        // T = t, L = len(v), V = v.
        // m.raw will look like:
        // [0:20]                               <- message header
        // [20:20+m.length]                     <- existing message attributes
        // [20+m.length:20+m.length+len(v)+4]   <- allocated buffer for new TLV
        // [first:last]                         <- same as previous
        let alloc_size = ATTRIBUTE_HEADER_SIZE + v.len(); // ~ len(TLV)
        let first = MESSAGE_HEADER_SIZE + self.length as usize; // first byte number
        let mut last = first + alloc_size; // last byte number
        self.grow(last, true); // growing cap(Raw) to fit TLV
        self.length += alloc_size as u32; // updating length

        // encoding attribute TLV to allocated buffer
        let buf = &mut self.raw[first..last];
        buf[0..2].copy_from_slice(&t.value().to_be_bytes());
        buf[2..4].copy_from_slice(&(v.len() as u16).to_be_bytes());
        buf[ATTRIBUTE_HEADER_SIZE..].copy_from_slice(v);

        let attr = RawAttribute {
            typ: t,                 // copying a constant
            length: v.len() as u16, // to reduce gc pressure
            value: v.to_vec(),
        };
        self.attributes.0.push(attr);

        // aligning to 32 bits
        if alloc_size & (PADDING - 1) != 0 {
            let align_size = nearest_padded_value_length(alloc_size);
            let align_diff = align_size - alloc_size;
            last += align_diff;
            self.grow(last, true);
            // padding is zeroed by grow
            self.length += align_diff as u32;
        }

        self.write_length();
    }

    /// get returns byte slice that represents attribute value,
    /// if there is no attribute with such type,
    /// ErrAttributeNotFound error returned.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        let (v, ok) = self.attributes.get(t);
        if !ok {
            return Err(Error::ErrAttributeNotFound);
        }
        Ok(v.value)
    }

    /// contains returns true if the message contains t attribute.
    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.get(t).1
    }

    /// build resets message and applies setters to it in batch, returning on
    /// first error. To prevent allocations, pass pointers to values.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    /// write_length writes m.length to m.raw.
    pub fn write_length(&mut self) {
        self.grow(4, false);
        self.raw[2..4].copy_from_slice(&(self.length as u16).to_be_bytes());
    }

    /// write_header writes header to underlying buffer. Not goroutine-safe.
    pub fn write_header(&mut self) {
        self.grow(MESSAGE_HEADER_SIZE, false);

        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes()); // magic cookie
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
        // transaction ID
    }

    /// write_transaction_id writes m.transaction_id to m.raw.
    pub fn write_transaction_id(&mut self) {
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    /// write_type writes m.typ to m.raw.
    pub fn write_type(&mut self) {
        self.grow(2, false);
        self.raw[..2].copy_from_slice(&self.typ.value().to_be_bytes());
    }

    /// set_type sets m.typ and writes it to m.raw.
    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// decode decodes m.raw into m.
    pub fn decode(&mut self) -> Result<()> {
        // decoding message header
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]); // first 2 bytes
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize; // second 2 bytes
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]); // last 4 bytes
        let full_size = MESSAGE_HEADER_SIZE + size; // len(m.Raw)

        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrInvalidMagicCookie(cookie));
        }
        if buf.len() < full_size {
            return Err(Error::ErrUnexpectedHeaderEof);
        }

        // saving header data
        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes.0.clear();
        let mut offset = 0;
        let mut b = &buf[MESSAGE_HEADER_SIZE..full_size];

        while offset < size {
            // checking that we have enough bytes to read header
            if b.len() < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrAttributeSizeInvalid);
            }

            let mut a = RawAttribute {
                typ: AttrType(u16::from_be_bytes([b[0], b[1]])), // first 2 bytes
                length: u16::from_be_bytes([b[2], b[3]]),        // second 2 bytes
                ..Default::default()
            };
            let a_l = a.length as usize; // attribute length
            let a_buff_l = nearest_padded_value_length(a_l); // expected buffer length (with padding)

            b = &b[ATTRIBUTE_HEADER_SIZE..]; // slicing again to simplify value read
            offset += ATTRIBUTE_HEADER_SIZE;
            if a_buff_l > b.len() {
                // checking size
                return Err(Error::ErrAttributeSizeOverflow);
            }

            a.value = b[..a_l].to_vec();
            offset += a_buff_l;
            b = &b[a_buff_l..];

            self.attributes.0.push(a);
        }

        Ok(())
    }
}
