//! Compact binary wire codec for the IPC stream.
//!
//! Every message is framed by a fixed 8-byte header
//! `(block_length:u16, template_id:u16, schema_id:u16, version:u16)`
//! followed by the message body. All integers and doubles are
//! little-endian; strings are `len:u16 || bytes`.
//!
//! The encoder owns a single growable buffer that is reset before each
//! encode; `data()` exposes the finished payload for transmission.
//! Strings are never silently truncated: an oversized string is a
//! [`CodecError::StringTooLong`].

use thiserror::Error;

use crate::types::PriceLevel;

/// Schema identifier stamped into every header.
pub const SCHEMA_ID: u16 = 1;
/// Schema version stamped into every header.
pub const SCHEMA_VERSION: u16 = 0;

/// Template ID for an order-book snapshot message.
pub const TEMPLATE_ORDERBOOK_SNAPSHOT: u16 = 2;
/// Template ID for a trade-signal message.
pub const TEMPLATE_TRADE_SIGNAL: u16 = 3;
/// Template ID for an order record message.
pub const TEMPLATE_ORDER: u16 = 4;

const SNAPSHOT_BLOCK_LENGTH: u16 = 48;
const SIGNAL_BLOCK_LENGTH: u16 = 32;
const ORDER_BLOCK_LENGTH: u16 = 64;
const GROUP_BLOCK_LENGTH: u16 = 16;

/// Length of the fixed message header.
pub const HEADER_LEN: usize = 8;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("string field of {len} bytes does not fit a u16 length prefix")]
    StringTooLong { len: usize },

    #[error("level group of {count} entries does not fit a u16 count")]
    GroupTooLarge { count: usize },

    #[error("buffer truncated: needed {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        needed: usize,
        offset: usize,
        available: usize,
    },

    #[error("unknown template id {0}")]
    UnknownTemplate(u16),

    #[error("unsupported schema id {0}")]
    UnsupportedSchema(u16),

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
}

/// Growable write buffer with a cursor, reset before each encode.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    /// The encoded payload of the most recent encode call.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) -> Result<(), CodecError> {
        let len = s.len();
        if len > u16::MAX as usize {
            return Err(CodecError::StringTooLong { len });
        }
        self.put_u16(len as u16);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn put_header(&mut self, block_length: u16, template_id: u16) {
        self.put_u16(block_length);
        self.put_u16(template_id);
        self.put_u16(SCHEMA_ID);
        self.put_u16(SCHEMA_VERSION);
    }

    fn put_level_group(&mut self, levels: &[PriceLevel]) -> Result<(), CodecError> {
        if levels.len() > u16::MAX as usize {
            return Err(CodecError::GroupTooLarge { count: levels.len() });
        }
        self.put_u16(GROUP_BLOCK_LENGTH);
        self.put_u16(levels.len() as u16);
        for level in levels {
            self.put_f64(level.price);
            self.put_f64(level.qty);
        }
        Ok(())
    }

    /// Encode an order-book snapshot (template 2).
    pub fn encode_orderbook_snapshot(
        &mut self,
        timestamp_ns: u64,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        symbol: &str,
    ) -> Result<(), CodecError> {
        self.reset();
        self.put_header(SNAPSHOT_BLOCK_LENGTH, TEMPLATE_ORDERBOOK_SNAPSHOT);
        self.put_u64(timestamp_ns);
        self.put_u16(bids.len().min(u16::MAX as usize) as u16);
        self.put_u16(asks.len().min(u16::MAX as usize) as u16);
        self.put_level_group(bids)?;
        self.put_level_group(asks)?;
        self.put_str(symbol)
    }

    /// Encode a trade signal (template 3). `action` is 0 = buy, 1 = sell.
    pub fn encode_trade_signal(
        &mut self,
        timestamp_ns: u64,
        action: u8,
        price: f64,
        qty: f64,
        symbol: &str,
    ) -> Result<(), CodecError> {
        self.reset();
        self.put_header(SIGNAL_BLOCK_LENGTH, TEMPLATE_TRADE_SIGNAL);
        self.put_u64(timestamp_ns);
        self.put_u8(action);
        self.put_f64(price);
        self.put_f64(qty);
        self.put_str(symbol)
    }

    /// Encode an order record (template 4).
    #[allow(clippy::too_many_arguments)]
    pub fn encode_order(
        &mut self,
        timestamp_ns: u64,
        order_id: &str,
        symbol: &str,
        side: &str,
        price: f64,
        qty: f64,
        is_active: bool,
    ) -> Result<(), CodecError> {
        self.reset();
        self.put_header(ORDER_BLOCK_LENGTH, TEMPLATE_ORDER);
        self.put_u64(timestamp_ns);
        self.put_f64(price);
        self.put_f64(qty);
        self.put_u8(u8::from(is_active));
        self.put_str(order_id)?;
        self.put_str(symbol)?;
        self.put_str(side)
    }
}

/// Fixed 8-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

/// Decoded order-book snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMessage {
    pub timestamp_ns: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub symbol: String,
}

/// Decoded trade signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub timestamp_ns: u64,
    pub action: u8,
    pub price: f64,
    pub qty: f64,
    pub symbol: String,
}

/// Decoded order record.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderMessage {
    pub timestamp_ns: u64,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub price: f64,
    pub qty: f64,
    pub is_active: bool,
}

/// Any message that can appear on the IPC stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Snapshot(SnapshotMessage),
    Signal(SignalMessage),
    Order(OrderMessage),
}

struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset.checked_add(n).ok_or(CodecError::Truncated {
            needed: n,
            offset: self.offset,
            available: self.buf.len(),
        })?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated {
                needed: n,
                offset: self.offset,
                available: self.buf.len(),
            });
        }
        let out = &self.buf[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    fn level_group(&mut self) -> Result<Vec<PriceLevel>, CodecError> {
        let _block_length = self.u16()?;
        let count = self.u16()? as usize;
        let mut levels = Vec::with_capacity(count);
        for _ in 0..count {
            let price = self.f64()?;
            let qty = self.f64()?;
            levels.push(PriceLevel { price, qty });
        }
        Ok(levels)
    }
}

/// Decode the fixed header without consuming the body.
pub fn decode_header(buf: &[u8]) -> Result<MessageHeader, CodecError> {
    let mut cur = Cursor::new(buf);
    let header = MessageHeader {
        block_length: cur.u16()?,
        template_id: cur.u16()?,
        schema_id: cur.u16()?,
        version: cur.u16()?,
    };
    if header.schema_id != SCHEMA_ID {
        return Err(CodecError::UnsupportedSchema(header.schema_id));
    }
    Ok(header)
}

/// Decode a complete framed message.
pub fn decode(buf: &[u8]) -> Result<DecodedMessage, CodecError> {
    let header = decode_header(buf)?;
    let mut cur = Cursor::new(buf);
    cur.take(HEADER_LEN)?;

    match header.template_id {
        TEMPLATE_ORDERBOOK_SNAPSHOT => {
            let timestamp_ns = cur.u64()?;
            let _bid_count = cur.u16()?;
            let _ask_count = cur.u16()?;
            let bids = cur.level_group()?;
            let asks = cur.level_group()?;
            let symbol = cur.string()?;
            Ok(DecodedMessage::Snapshot(SnapshotMessage {
                timestamp_ns,
                bids,
                asks,
                symbol,
            }))
        }
        TEMPLATE_TRADE_SIGNAL => {
            let timestamp_ns = cur.u64()?;
            let action = cur.u8()?;
            let price = cur.f64()?;
            let qty = cur.f64()?;
            let symbol = cur.string()?;
            Ok(DecodedMessage::Signal(SignalMessage {
                timestamp_ns,
                action,
                price,
                qty,
                symbol,
            }))
        }
        TEMPLATE_ORDER => {
            let timestamp_ns = cur.u64()?;
            let price = cur.f64()?;
            let qty = cur.f64()?;
            let is_active = cur.u8()? != 0;
            let order_id = cur.string()?;
            let symbol = cur.string()?;
            let side = cur.string()?;
            Ok(DecodedMessage::Order(OrderMessage {
                timestamp_ns,
                order_id,
                symbol,
                side,
                price,
                qty,
                is_active,
            }))
        }
        other => Err(CodecError::UnknownTemplate(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let bids: Vec<PriceLevel> = (0..5)
            .map(|i| PriceLevel::new(3000.0 - i as f64 * 0.5, 1.0 + i as f64))
            .collect();
        let asks: Vec<PriceLevel> = (0..3)
            .map(|i| PriceLevel::new(3000.5 + i as f64 * 0.5, 2.0 + i as f64))
            .collect();

        let mut enc = Encoder::new();
        enc.encode_orderbook_snapshot(1_700_000_000_000_000_000, &bids, &asks, "ETHUSDT")
            .unwrap();

        let header = decode_header(enc.data()).unwrap();
        assert_eq!(header.template_id, TEMPLATE_ORDERBOOK_SNAPSHOT);
        assert_eq!(header.block_length, 48);
        assert_eq!(header.schema_id, SCHEMA_ID);
        assert_eq!(header.version, SCHEMA_VERSION);

        match decode(enc.data()).unwrap() {
            DecodedMessage::Snapshot(msg) => {
                assert_eq!(msg.timestamp_ns, 1_700_000_000_000_000_000);
                assert_eq!(msg.bids, bids);
                assert_eq!(msg.asks, asks);
                assert_eq!(msg.symbol, "ETHUSDT");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_signal_roundtrip() {
        let mut enc = Encoder::new();
        enc.encode_trade_signal(99, 1, 59999.9, 0.002, "BTCUSDT")
            .unwrap();

        match decode(enc.data()).unwrap() {
            DecodedMessage::Signal(msg) => {
                assert_eq!(msg.timestamp_ns, 99);
                assert_eq!(msg.action, 1);
                assert_eq!(msg.price.to_bits(), 59999.9f64.to_bits());
                assert_eq!(msg.qty.to_bits(), 0.002f64.to_bits());
                assert_eq!(msg.symbol, "BTCUSDT");
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_order_roundtrip() {
        let mut enc = Encoder::new();
        enc.encode_order(7, "BOT_1", "BTCUSDT", "Sell", 60000.5, 0.001, true)
            .unwrap();

        match decode(enc.data()).unwrap() {
            DecodedMessage::Order(msg) => {
                assert_eq!(msg.order_id, "BOT_1");
                assert_eq!(msg.symbol, "BTCUSDT");
                assert_eq!(msg.side, "Sell");
                assert_eq!(msg.price.to_bits(), 60000.5f64.to_bits());
                assert_eq!(msg.qty.to_bits(), 0.001f64.to_bits());
                assert!(msg.is_active);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_order_layout_is_little_endian() {
        let mut enc = Encoder::new();
        enc.encode_order(1, "BOT_1", "X", "Sell", 2.0, 0.0, false)
            .unwrap();
        let data = enc.data();

        // Header: block_length=64, template=4, schema=1, version=0.
        assert_eq!(&data[0..8], &[64, 0, 4, 0, 1, 0, 0, 0]);
        // timestamp_ns = 1 as LE u64.
        assert_eq!(&data[8..16], &[1, 0, 0, 0, 0, 0, 0, 0]);
        // price 2.0 = 0x4000000000000000 in LE bytes.
        assert_eq!(&data[16..24], &2.0f64.to_le_bytes());
        // is_active byte follows qty.
        assert_eq!(data[32], 0);
        // order_id length prefix, then bytes.
        assert_eq!(&data[33..35], &[5, 0]);
        assert_eq!(&data[35..40], b"BOT_1");
    }

    #[test]
    fn test_string_lengths_are_exact() {
        let mut enc = Encoder::new();
        enc.encode_order(1, "BOT_1", "ETHUSDT", "Sell", 1.0, 1.0, true)
            .unwrap();
        match decode(enc.data()).unwrap() {
            DecodedMessage::Order(msg) => {
                assert_eq!(msg.order_id.len(), 5);
                assert_eq!(msg.symbol.len(), 7);
                assert_eq!(msg.side.len(), 4);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_buffer_is_rejected() {
        let mut enc = Encoder::new();
        enc.encode_trade_signal(1, 0, 1.0, 1.0, "BTCUSDT").unwrap();
        let data = enc.data();
        let err = decode(&data[..data.len() - 3]);
        assert!(matches!(err, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_unknown_template_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&77u16.to_le_bytes());
        buf.extend_from_slice(&SCHEMA_ID.to_le_bytes());
        buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
        assert!(matches!(decode(&buf), Err(CodecError::UnknownTemplate(77))));
    }

    #[test]
    fn test_encoder_reset_between_encodes() {
        let mut enc = Encoder::new();
        enc.encode_orderbook_snapshot(1, &[PriceLevel::new(1.0, 1.0)], &[], "BTCUSDT")
            .unwrap();
        let first_len = enc.len();
        enc.encode_trade_signal(2, 0, 1.0, 1.0, "BTCUSDT").unwrap();
        // The signal is shorter than the snapshot; a missing reset would
        // leave the snapshot bytes in front.
        assert!(enc.len() < first_len);
        assert!(matches!(
            decode(enc.data()).unwrap(),
            DecodedMessage::Signal(_)
        ));
    }

    #[test]
    fn test_empty_sides_roundtrip() {
        let mut enc = Encoder::new();
        enc.encode_orderbook_snapshot(5, &[], &[], "BTCUSDT").unwrap();
        match decode(enc.data()).unwrap() {
            DecodedMessage::Snapshot(msg) => {
                assert!(msg.bids.is_empty());
                assert!(msg.asks.is_empty());
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }
}
