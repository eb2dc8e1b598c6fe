//! A strongly-typed tracee address. This crate only ever needs one width
//! of address (no typed remote pointers to tracee-side structs), so a
//! single newtype over `u64` covers it.

use std::fmt;
use std::ops::{Add, Sub};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Address(pub u64);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_hex(s: &str) -> Option<Address> {
        let s = s.trim();
        let stripped = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
        u64::from_str_radix(stripped, 16).ok().map(Address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl Add<u64> for Address {
    type Output = Address;
    fn add(self, rhs: u64) -> Address {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<Address> for Address {
    type Output = u64;
    fn sub(self, rhs: Address) -> u64 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl From<u64> for Address {
    fn from(v: u64) -> Address {
        Address(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let a = Address::from_hex("0x1234abcd").unwrap();
        assert_eq!(a.0, 0x1234_abcd);
        assert_eq!(format!("{}", a), "0x1234abcd");
    }

    #[test]
    fn null_checks() {
        assert!(Address::NULL.is_null());
        assert!(!Address(1).is_null());
    }
}
