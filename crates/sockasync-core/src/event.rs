//! Readiness event bits.
//!
//! `EventMask` is the portable mask exchanged between a reactor and the
//! per-socket event handler. It is deliberately independent of the epoll
//! constant values; reactors translate at their boundary.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// A set of readiness bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: Self = Self(0);
    /// Readable (or a connection is waiting on a listener).
    pub const IN: Self = Self(1 << 0);
    /// Writable (or a non-blocking connect finished).
    pub const OUT: Self = Self(1 << 1);
    /// Peer shut down its write half.
    pub const RDHUP: Self = Self(1 << 2);
    /// Hang-up: both directions are finished.
    pub const HUP: Self = Self(1 << 3);
    /// A socket error is pending.
    pub const ERR: Self = Self(1 << 4);
    /// Edge-triggered delivery (interest only, never reported).
    pub const ET: Self = Self(1 << 5);

    /// Interest registered by every async context on creation.
    pub const DEFAULT_INTEREST: Self = Self(Self::IN.0 | Self::OUT.0 | Self::RDHUP.0 | Self::ET.0);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any bit of `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// The interest bits that actually request readiness (ignores `ET`).
    #[inline]
    pub const fn readiness(self) -> Self {
        Self(self.0 & !Self::ET.0)
    }
}

impl BitOr for EventMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for EventMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for EventMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventMask, &str); 6] = [
            (EventMask::IN, "IN"),
            (EventMask::OUT, "OUT"),
            (EventMask::RDHUP, "RDHUP"),
            (EventMask::HUP, "HUP"),
            (EventMask::ERR, "ERR"),
            (EventMask::ET, "ET"),
        ];

        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interest() {
        let m = EventMask::DEFAULT_INTEREST;
        assert!(m.contains(EventMask::IN | EventMask::OUT));
        assert!(m.contains(EventMask::RDHUP));
        assert!(m.contains(EventMask::ET));
        assert!(!m.intersects(EventMask::HUP | EventMask::ERR));
    }

    #[test]
    fn test_remove_read_interest() {
        let mut m = EventMask::DEFAULT_INTEREST;
        m.remove(EventMask::IN | EventMask::RDHUP);
        assert_eq!(m, EventMask::OUT | EventMask::ET);
        assert_eq!(m.readiness(), EventMask::OUT);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", EventMask::NONE), "NONE");
        assert_eq!(format!("{:?}", EventMask::IN | EventMask::HUP), "IN|HUP");
    }
}
