//! Time structures and slot sub-timing.
//!
//! - [`Instant`] is used to represent a point in time.
//! - [`Duration`] is used to represent a duration of time.
//! - [`SlotDurations`] carries the intra-slot timing budget supplied by the
//!   board.

/// A point in time, in microseconds since an arbitrary epoch.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub struct Instant {
    us: i64,
}

impl Instant {
    /// Create a new `Instant` from microseconds since the epoch.
    pub const fn from_us(us: i64) -> Self {
        Self { us }
    }

    /// Returns the point in time as microseconds since the epoch.
    pub const fn as_us(&self) -> i64 {
        self.us
    }
}

/// A span of time, in microseconds.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Self = Self(0);

    /// Create a new `Duration` from microseconds.
    pub const fn from_us(us: i64) -> Self {
        Self(us)
    }

    /// Returns the duration as microseconds.
    pub const fn as_us(&self) -> i64 {
        self.0
    }
}

impl core::ops::Sub for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Self::Output {
        Duration::from_us(self.as_us() - rhs.as_us())
    }
}

impl core::ops::Sub<Duration> for Instant {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self::from_us(self.us - rhs.as_us())
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::from_us(self.us + rhs.as_us())
    }
}

impl core::ops::Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self::from_us(self.as_us() - rhs.as_us())
    }
}

impl core::ops::Add for Duration {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::from_us(self.as_us() + rhs.as_us())
    }
}

impl core::ops::Mul<usize> for Duration {
    type Output = Self;

    fn mul(self, rhs: usize) -> Self::Output {
        Self::from_us(self.as_us() * rhs as i64)
    }
}

impl core::ops::Div<usize> for Duration {
    type Output = Self;

    fn div(self, rhs: usize) -> Self::Output {
        Self::from_us(self.as_us() / rhs as i64)
    }
}

impl core::fmt::Display for Instant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}ms", self.as_us() as f32 / 1000.0)
    }
}

impl core::fmt::Display for Duration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}ms", self.as_us() as f32 / 1000.0)
    }
}

/// Intra-slot timing budget, supplied by the board support package.
///
/// The transmitter keys off `tx_offset`; the receiver opens `rx_guard` early
/// and keeps listening for at most `rx_max`. Deferred work (digest
/// recomputation, event delivery, cleanup) runs inside `end_guard`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDurations {
    /// Delay from slot start to the first transmitted bit.
    pub tx_offset: Duration,
    /// Maximum time on air.
    pub tx_max: Duration,
    /// How long before the expected first bit the receiver opens.
    pub rx_guard: Duration,
    /// Delay from slot start to receiver open, `tx_offset - rx_guard`.
    pub rx_offset: Duration,
    /// Maximum time the receiver stays open.
    pub rx_max: Duration,
    /// Tail reserved for deferred work.
    pub end_guard: Duration,
}

impl SlotDurations {
    /// Total slot length.
    pub fn whole_slot(&self) -> Duration {
        let tx = self.tx_offset + self.tx_max;
        let rx = self.rx_guard + self.rx_offset + self.rx_max;
        core::cmp::max(tx, rx) + self.end_guard
    }
}

impl Default for SlotDurations {
    fn default() -> Self {
        Self {
            tx_offset: Duration::from_us(400),
            tx_max: Duration::from_us(1000),
            rx_guard: Duration::from_us(100),
            rx_offset: Duration::from_us(300),
            rx_max: Duration::from_us(1200),
            end_guard: Duration::from_us(200),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_operations() {
        let a = Instant::from_us(100);
        let b = Instant::from_us(50);
        assert_eq!((a - b).as_us(), 50);
        assert_eq!((a - Duration::from_us(50)).as_us(), 50);
        assert_eq!((a + Duration::from_us(50)).as_us(), 150);
    }

    #[test]
    fn duration_operations() {
        let a = Duration::from_us(100);
        let b = Duration::from_us(50);
        assert_eq!((a - b).as_us(), 50);
        assert_eq!((a + b).as_us(), 150);
        assert_eq!((a * 2).as_us(), 200);
        assert_eq!((a / 2).as_us(), 50);
    }

    #[test]
    fn whole_slot() {
        let durations = SlotDurations::default();
        // max(400 + 1000, 100 + 300 + 1200) + 200
        assert_eq!(durations.whole_slot(), Duration::from_us(1800));
    }
}
