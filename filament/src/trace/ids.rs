use std::fmt;
use std::num::ParseIntError;

/// A 16-byte value identifying a trace.
///
/// Every span belonging to one trace carries the same trace id. The id is
/// valid if it is non-zero.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid (all-zero) trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Parses a trace id from up to 32 hex characters.
    ///
    /// Shorter values are interpreted left-zero-padded, so 64-bit ids from
    /// older peers parse into the low bits.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u128::from_str_radix(hex, 16).map(TraceId)
    }

    /// Returns the id as a `u128`.
    pub const fn to_u128(self) -> u128 {
        self.0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

/// An 8-byte value identifying a span within a trace.
///
/// The id is valid if it is non-zero.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The invalid (all-zero) span id.
    pub const INVALID: SpanId = SpanId(0);

    /// Parses a span id from up to 16 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(SpanId)
    }

    /// Returns the id as a `u64`.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_hex_round_trip() {
        let id = TraceId::from(0x5f46_7fe7_bf42_676c_05e2_0ba4_a90e_448e_u128);
        assert_eq!(format!("{id}"), "5f467fe7bf42676c05e20ba4a90e448e");
        assert_eq!(TraceId::from_hex("5f467fe7bf42676c05e20ba4a90e448e"), Ok(id));
    }

    #[test]
    fn short_hex_pads_left() {
        assert_eq!(TraceId::from_hex("2a"), Ok(TraceId::from(42u128)));
        assert_eq!(SpanId::from_hex("2a"), Ok(SpanId::from(42u64)));
        assert_eq!(format!("{}", SpanId::from(42u64)), "000000000000002a");
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!(TraceId::from_hex("not_hex").is_err());
        assert!(SpanId::from_hex("").is_err());
        // 17 hex chars overflow a span id.
        assert!(SpanId::from_hex("12345678901234567").is_err());
    }
}
