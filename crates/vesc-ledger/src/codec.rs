//! # Ledger Codec
//!
//! Fixed-width, big-endian binary layouts for entries, counters and the
//! last-entry pointer. These are the storage slots a host without memory
//! keeps between invocations.
//!
//! ## Layouts
//!
//! ```text
//! Entry (396 bytes)
//!   version u8 | request_id [32] | user [32] | verifier [32] | amount u64
//!   created_at i64 | expires_at i64 | status u8
//!   data_ref flag u8 + [32] | fraud_score u8 | fraud_detected u8
//!   dispute_status u8 | reason len u8 + [128]
//!   resolver flag u8 + [32] | resolved_at flag u8 + i64
//!   submitted_at flag u8 + i64 | settled_at flag u8 + i64
//!   verifier_share u64 | platform_fee u64 | fee_recipient flag u8 + [32]
//!
//! Counters (32 bytes)    created | locked | released | refunded   (u64 each)
//!
//! LastEntry (120 bytes)  request_id | user | verifier | amount | created_at | expires_at
//! ```
//!
//! Absent optional fields are encoded as a zero flag followed by zero bytes,
//! so every record of a kind has the same width.

use thiserror::Error;

use vesc_core::{AccountId, DataRef, RequestId, Timestamp, ID_LEN};

use crate::state::{
    Counters, DisputeReason, DisputeStatus, EscrowRequest, EscrowStatus, LastEntry,
    MAX_REASON_LEN,
};

/// Current entry layout version.
pub const ENTRY_VERSION: u8 = 2;

/// Width of an encoded entry.
pub const ENTRY_LEN: usize = 396;

/// Width of encoded counters.
pub const COUNTERS_LEN: usize = 32;

/// Width of an encoded last-entry pointer.
pub const LAST_ENTRY_LEN: usize = 120;

/// Errors decoding a fixed-width record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before the record did.
    #[error("truncated {record}: need {expected} bytes, got {actual}")]
    Truncated {
        /// The record being decoded.
        record: &'static str,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown escrow status tag.
    #[error("unknown escrow status tag {0}")]
    UnknownStatus(u8),

    /// Unknown dispute status tag.
    #[error("unknown dispute status tag {0}")]
    UnknownDisputeStatus(u8),

    /// A presence or boolean flag was neither 0 nor 1.
    #[error("invalid flag {value} for {field}")]
    InvalidFlag {
        /// The field.
        field: &'static str,
        /// The byte found.
        value: u8,
    },

    /// The reason length byte exceeds the reason slot.
    #[error("dispute reason length {0} exceeds {MAX_REASON_LEN}")]
    ReasonTooLong(usize),

    /// The reason bytes are not UTF-8.
    #[error("dispute reason is not valid UTF-8")]
    InvalidUtf8,

    /// The record was written by an unknown layout version.
    #[error("unsupported {record} version {version}")]
    UnsupportedVersion {
        /// The record being decoded.
        record: &'static str,
        /// The version found.
        version: u8,
    },

    /// The record does not start with the expected magic bytes.
    #[error("bad magic: expected {expected:?}, got {actual:?}")]
    BadMagic {
        /// Expected magic.
        expected: [u8; 4],
        /// Bytes found.
        actual: [u8; 4],
    },

    /// A timestamp slot holds a value chrono cannot represent.
    #[error("invalid timestamp {0} in {1}")]
    InvalidTimestamp(i64, &'static str),
}

// ── Writer / Reader ────────────────────────────────────────────────────

/// Appends fixed-width fields to a buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// A writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// One byte.
    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Big-endian u64.
    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Big-endian i64.
    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Raw bytes.
    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// `n` zero bytes.
    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Timestamp as epoch seconds.
    pub fn timestamp(&mut self, ts: Timestamp) {
        self.i64(ts.epoch_secs());
    }

    /// Flag + 32 bytes, zero-filled when absent.
    pub fn opt_id(&mut self, id: Option<&[u8; ID_LEN]>) {
        match id {
            Some(bytes) => {
                self.u8(1);
                self.bytes(bytes);
            }
            None => {
                self.u8(0);
                self.zeros(ID_LEN);
            }
        }
    }

    /// Flag + 8 bytes, zero-filled when absent.
    pub fn opt_timestamp(&mut self, ts: Option<Timestamp>) {
        match ts {
            Some(ts) => {
                self.u8(1);
                self.timestamp(ts);
            }
            None => {
                self.u8(0);
                self.zeros(8);
            }
        }
    }

    /// The encoded bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads fixed-width fields from a slice whose length was checked up front.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    record: &'static str,
}

impl<'a> Reader<'a> {
    /// Start reading `record`, requiring at least `expected` bytes.
    pub fn new(buf: &'a [u8], expected: usize, record: &'static str) -> Result<Self, CodecError> {
        if buf.len() < expected {
            return Err(CodecError::Truncated {
                record,
                expected,
                actual: buf.len(),
            });
        }
        Ok(Self { buf, pos: 0, record })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.pos + N;
        let slice = self.buf.get(self.pos..end).ok_or(CodecError::Truncated {
            record: self.record,
            expected: end,
            actual: self.buf.len(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// One byte.
    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    /// Big-endian u64.
    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take::<8>()?))
    }

    /// Big-endian i64.
    pub fn i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take::<8>()?))
    }

    /// Fixed-size byte array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.take::<N>()
    }

    /// A 0/1 flag.
    pub fn flag(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(CodecError::InvalidFlag { field, value }),
        }
    }

    /// Timestamp from epoch seconds.
    pub fn timestamp(&mut self, field: &'static str) -> Result<Timestamp, CodecError> {
        let secs = self.i64()?;
        Timestamp::from_epoch_secs(secs).map_err(|_| CodecError::InvalidTimestamp(secs, field))
    }

    /// Flag + 32 bytes.
    pub fn opt_id(&mut self, field: &'static str) -> Result<Option<[u8; ID_LEN]>, CodecError> {
        let present = self.flag(field)?;
        let bytes = self.array::<ID_LEN>()?;
        Ok(present.then_some(bytes))
    }

    /// Flag + 8 bytes.
    pub fn opt_timestamp(&mut self, field: &'static str) -> Result<Option<Timestamp>, CodecError> {
        let present = self.flag(field)?;
        let secs = self.i64()?;
        if !present {
            return Ok(None);
        }
        Timestamp::from_epoch_secs(secs)
            .map(Some)
            .map_err(|_| CodecError::InvalidTimestamp(secs, field))
    }
}

// ── Entry ──────────────────────────────────────────────────────────────

/// Encode an entry into its 396-byte slot.
pub fn encode_entry(entry: &EscrowRequest) -> Vec<u8> {
    let mut w = Writer::with_capacity(ENTRY_LEN);
    w.u8(ENTRY_VERSION);
    w.bytes(entry.request_id.as_bytes());
    w.bytes(entry.user.as_bytes());
    w.bytes(entry.verifier.as_bytes());
    w.u64(entry.amount);
    w.timestamp(entry.created_at);
    w.timestamp(entry.expires_at);
    w.u8(entry.status.tag());
    w.opt_id(entry.verification_data.as_ref().map(DataRef::as_bytes));
    w.u8(entry.fraud_score);
    w.u8(u8::from(entry.fraud_detected));
    w.u8(entry.dispute_status.tag());

    // DisputeReason guarantees the length fits.
    let reason = entry.dispute_reason.as_str().as_bytes();
    let len = reason.len().min(MAX_REASON_LEN);
    w.u8(len as u8);
    w.bytes(&reason[..len]);
    w.zeros(MAX_REASON_LEN - len);

    w.opt_id(entry.resolver.as_ref().map(AccountId::as_bytes));
    w.opt_timestamp(entry.resolved_at);
    w.opt_timestamp(entry.submitted_at);
    w.opt_timestamp(entry.settled_at);
    w.u64(entry.verifier_share);
    w.u64(entry.platform_fee);
    w.opt_id(entry.fee_recipient.as_ref().map(AccountId::as_bytes));
    w.finish()
}

/// Decode an entry from its slot.
pub fn decode_entry(bytes: &[u8]) -> Result<EscrowRequest, CodecError> {
    let mut r = Reader::new(bytes, ENTRY_LEN, "entry")?;
    let version = r.u8()?;
    if version != ENTRY_VERSION {
        return Err(CodecError::UnsupportedVersion {
            record: "entry",
            version,
        });
    }
    let request_id = RequestId::from_bytes(r.array()?);
    let user = AccountId::from_bytes(r.array()?);
    let verifier = AccountId::from_bytes(r.array()?);
    let amount = r.u64()?;
    let created_at = r.timestamp("created_at")?;
    let expires_at = r.timestamp("expires_at")?;
    let status_tag = r.u8()?;
    let status = EscrowStatus::from_tag(status_tag).ok_or(CodecError::UnknownStatus(status_tag))?;
    let verification_data = r.opt_id("verification_data")?.map(DataRef::from_bytes);
    let fraud_score = r.u8()?;
    let fraud_detected = r.flag("fraud_detected")?;
    let dispute_tag = r.u8()?;
    let dispute_status =
        DisputeStatus::from_tag(dispute_tag).ok_or(CodecError::UnknownDisputeStatus(dispute_tag))?;

    let len = usize::from(r.u8()?);
    if len > MAX_REASON_LEN {
        return Err(CodecError::ReasonTooLong(len));
    }
    let slot = r.array::<MAX_REASON_LEN>()?;
    let text = std::str::from_utf8(&slot[..len]).map_err(|_| CodecError::InvalidUtf8)?;
    let dispute_reason = DisputeReason::new(text).map_err(|_| CodecError::ReasonTooLong(len))?;

    let resolver = r.opt_id("resolver")?.map(AccountId::from_bytes);
    let resolved_at = r.opt_timestamp("resolved_at")?;
    let submitted_at = r.opt_timestamp("submitted_at")?;
    let settled_at = r.opt_timestamp("settled_at")?;
    let verifier_share = r.u64()?;
    let platform_fee = r.u64()?;
    let fee_recipient = r.opt_id("fee_recipient")?.map(AccountId::from_bytes);

    Ok(EscrowRequest {
        request_id,
        user,
        verifier,
        amount,
        created_at,
        expires_at,
        status,
        verification_data,
        fraud_score,
        fraud_detected,
        dispute_status,
        dispute_reason,
        resolver,
        resolved_at,
        submitted_at,
        settled_at,
        verifier_share,
        platform_fee,
        fee_recipient,
    })
}

// ── Counters ───────────────────────────────────────────────────────────

/// Append counters to a writer.
pub fn write_counters(w: &mut Writer, counters: &Counters) {
    w.u64(counters.created);
    w.u64(counters.locked);
    w.u64(counters.released);
    w.u64(counters.refunded);
}

/// Read counters from a reader.
pub fn read_counters(r: &mut Reader<'_>) -> Result<Counters, CodecError> {
    Ok(Counters {
        created: r.u64()?,
        locked: r.u64()?,
        released: r.u64()?,
        refunded: r.u64()?,
    })
}

/// Encode counters into their 32-byte slot.
pub fn encode_counters(counters: &Counters) -> Vec<u8> {
    let mut w = Writer::with_capacity(COUNTERS_LEN);
    write_counters(&mut w, counters);
    w.finish()
}

/// Decode counters from their slot.
pub fn decode_counters(bytes: &[u8]) -> Result<Counters, CodecError> {
    let mut r = Reader::new(bytes, COUNTERS_LEN, "counters")?;
    read_counters(&mut r)
}

// ── Last Entry ─────────────────────────────────────────────────────────

/// Append a pointer to a writer.
pub fn write_last_entry(w: &mut Writer, last: &LastEntry) {
    w.bytes(last.request_id.as_bytes());
    w.bytes(last.user.as_bytes());
    w.bytes(last.verifier.as_bytes());
    w.u64(last.amount);
    w.timestamp(last.created_at);
    w.timestamp(last.expires_at);
}

/// Read a pointer from a reader.
pub fn read_last_entry(r: &mut Reader<'_>) -> Result<LastEntry, CodecError> {
    Ok(LastEntry {
        request_id: RequestId::from_bytes(r.array()?),
        user: AccountId::from_bytes(r.array()?),
        verifier: AccountId::from_bytes(r.array()?),
        amount: r.u64()?,
        created_at: r.timestamp("last_entry.created_at")?,
        expires_at: r.timestamp("last_entry.expires_at")?,
    })
}

/// Encode a pointer into its 120-byte slot.
pub fn encode_last_entry(last: &LastEntry) -> Vec<u8> {
    let mut w = Writer::with_capacity(LAST_ENTRY_LEN);
    write_last_entry(&mut w, last);
    w.finish()
}

/// Decode a pointer from its slot.
pub fn decode_last_entry(bytes: &[u8]) -> Result<LastEntry, CodecError> {
    let mut r = Reader::new(bytes, LAST_ENTRY_LEN, "last entry")?;
    read_last_entry(&mut r)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(secs).unwrap()
    }

    fn sample() -> EscrowRequest {
        let mut entry = EscrowRequest::new(
            RequestId::parse("0xaa").unwrap(),
            AccountId::derive("user"),
            AccountId::derive("verifier"),
            100,
            ts(1_700_000_000),
            ts(1_700_604_800),
        );
        entry.status = EscrowStatus::Refunded;
        entry.verification_data = Some(DataRef::of(b"data"));
        entry.fraud_score = 42;
        entry.dispute_status = DisputeStatus::ResolvedForUser;
        entry.dispute_reason = DisputeReason::new("bad doc").unwrap();
        entry.resolver = Some(AccountId::derive("resolver"));
        entry.resolved_at = Some(ts(1_700_000_500));
        entry.submitted_at = Some(ts(1_700_000_100));
        entry.settled_at = Some(ts(1_700_000_500));
        entry
    }

    #[test]
    fn entry_is_fixed_width() {
        assert_eq!(encode_entry(&sample()).len(), ENTRY_LEN);
        let fresh = EscrowRequest::new(
            RequestId::parse("0x01").unwrap(),
            AccountId::derive("u"),
            AccountId::derive("v"),
            1,
            ts(0),
            ts(1),
        );
        assert_eq!(encode_entry(&fresh).len(), ENTRY_LEN);
    }

    #[test]
    fn entry_roundtrip_preserves_every_field() {
        let entry = sample();
        assert_eq!(decode_entry(&encode_entry(&entry)).unwrap(), entry);

        let mut released = sample();
        released.status = EscrowStatus::Completed;
        released.verifier_share = 97;
        released.platform_fee = 3;
        released.fee_recipient = Some(AccountId::derive("platform"));
        let bytes = encode_entry(&released);
        assert_eq!(bytes[ENTRY_LEN - 33], 1);
        assert_eq!(&bytes[ENTRY_LEN - 32..], AccountId::derive("platform").as_bytes());
        assert_eq!(decode_entry(&bytes).unwrap(), released);
    }

    #[test]
    fn amount_is_big_endian() {
        let bytes = encode_entry(&sample());
        // version + three ids
        assert_eq!(&bytes[97..105], &100u64.to_be_bytes());
    }

    #[test]
    fn truncated_entry_rejected() {
        let bytes = encode_entry(&sample());
        assert!(matches!(
            decode_entry(&bytes[..ENTRY_LEN - 1]),
            Err(CodecError::Truncated { expected: ENTRY_LEN, .. })
        ));
    }

    #[test]
    fn unknown_status_rejected() {
        let mut bytes = encode_entry(&sample());
        bytes[121] = 42;
        assert_eq!(decode_entry(&bytes), Err(CodecError::UnknownStatus(42)));
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = encode_entry(&sample());
        bytes[0] = 9;
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::UnsupportedVersion { version: 9, .. })
        ));
    }

    #[test]
    fn bad_flag_rejected() {
        let mut bytes = encode_entry(&sample());
        // fraud_detected flag follows status, data ref and score
        bytes[156] = 7;
        assert!(matches!(
            decode_entry(&bytes),
            Err(CodecError::InvalidFlag { field: "fraud_detected", value: 7 })
        ));
    }

    #[test]
    fn overlong_reason_rejected() {
        let mut bytes = encode_entry(&sample());
        bytes[158] = 200;
        assert_eq!(decode_entry(&bytes), Err(CodecError::ReasonTooLong(200)));
    }

    #[test]
    fn non_utf8_reason_rejected() {
        let mut bytes = encode_entry(&sample());
        bytes[159] = 0xff;
        assert_eq!(decode_entry(&bytes), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn counters_layout() {
        let counters = Counters {
            created: 1,
            locked: 2,
            released: 3,
            refunded: 4,
        };
        let bytes = encode_counters(&counters);
        assert_eq!(bytes.len(), COUNTERS_LEN);
        assert_eq!(&bytes[24..32], &4u64.to_be_bytes());
        assert_eq!(decode_counters(&bytes).unwrap(), counters);
    }

    #[test]
    fn last_entry_layout() {
        let last = sample().last_entry();
        let bytes = encode_last_entry(&last);
        assert_eq!(bytes.len(), LAST_ENTRY_LEN);
        assert_eq!(decode_last_entry(&bytes).unwrap(), last);
        assert!(decode_last_entry(&bytes[..100]).is_err());
    }
}
