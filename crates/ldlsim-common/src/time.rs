//! Virtual time.
//!
//! One tick is one microsecond of virtual time. The same constant is used by the
//! clock, the airtime model and the gateway's 32-bit timestamp counter, so a
//! gateway `tmst` is simply the low 32 bits of the tick count.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of ticks in one virtual second.
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// A point on the virtual time axis, in ticks since the clock was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct VirtualTime(u64);

impl VirtualTime {
    /// The start of every time axis.
    pub const ZERO: VirtualTime = VirtualTime(0);

    /// Create a time from a raw tick count.
    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        VirtualTime(ticks)
    }

    /// Create a time from microseconds.
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        VirtualTime(micros.saturating_mul(TICKS_PER_SECOND / 1_000_000))
    }

    /// Create a time from milliseconds.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        VirtualTime(millis.saturating_mul(TICKS_PER_SECOND / 1_000))
    }

    /// Create a time from whole seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        VirtualTime(secs.saturating_mul(TICKS_PER_SECOND))
    }

    /// Raw tick count.
    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Time in (fractional) seconds, for display and logs.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND as f64
    }

    /// The gateway's free running 32-bit microsecond counter at this time.
    #[inline]
    pub const fn tmst(self) -> u32 {
        (self.0 & 0xffff_ffff) as u32
    }

    /// Ticks from `earlier` to `self`, or zero if `earlier` is later.
    #[inline]
    pub const fn saturating_since(self, earlier: VirtualTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Convert whole seconds to ticks, saturating at `u64::MAX`.
#[inline]
pub const fn secs_to_ticks(secs: u64) -> u64 {
    secs.saturating_mul(TICKS_PER_SECOND)
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl Add<u64> for VirtualTime {
    type Output = VirtualTime;

    fn add(self, ticks: u64) -> VirtualTime {
        VirtualTime(self.0.saturating_add(ticks))
    }
}

impl AddAssign<u64> for VirtualTime {
    fn add_assign(&mut self, ticks: u64) {
        self.0 = self.0.saturating_add(ticks);
    }
}

impl Sub for VirtualTime {
    type Output = u64;

    fn sub(self, rhs: VirtualTime) -> u64 {
        self.0 - rhs.0
    }
}
