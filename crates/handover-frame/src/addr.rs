use std::fmt;
use std::str::FromStr;

/// A 48-bit Bluetooth device address, stored in transmission order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr([u8; 6]);

/// Error returned when parsing a [`BdAddr`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device address '{0}' (expected six hex octets such as 00:02:5b:00:eb:01)")]
pub struct ParseAddrError(String);

impl BdAddr {
    /// The all-zero address, used as "no device".
    pub const ZERO: BdAddr = BdAddr([0; 6]);

    /// Length of an address on the wire.
    pub const LEN: usize = 6;

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Read an address from the first six bytes of `src`.
    pub fn from_slice(src: &[u8]) -> Option<Self> {
        let bytes: [u8; 6] = src.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({self})")
    }
}

impl FromStr for BdAddr {
    type Err = ParseAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| ParseAddrError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseAddrError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseAddrError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseAddrError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let addr = BdAddr::new([0x00, 0x02, 0x5b, 0x00, 0xeb, 0x01]);
        assert_eq!(addr.to_string(), "00:02:5b:00:eb:01");
        assert_eq!("00:02:5B:00:EB:01".parse::<BdAddr>().unwrap(), addr);
    }

    #[test]
    fn rejects_malformed_text() {
        for bad in ["", "00:02:5b:00:eb", "00:02:5b:00:eb:01:02", "0:02:5b:00:eb:01", "zz:02:5b:00:eb:01"] {
            assert!(bad.parse::<BdAddr>().is_err(), "{bad}");
        }
    }

    #[test]
    fn zero_address() {
        assert!(BdAddr::ZERO.is_zero());
        assert!(BdAddr::default().is_zero());
        assert!(!BdAddr::new([0, 0, 0, 0, 0, 1]).is_zero());
    }

    #[test]
    fn from_slice_needs_six_bytes() {
        assert!(BdAddr::from_slice(&[1, 2, 3, 4, 5]).is_none());
        let addr = BdAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(addr.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }
}
