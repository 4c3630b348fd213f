use std::time::{SystemTime, UNIX_EPOCH};

/// A trait for time sources returning a wall-clock timestamp.
///
/// This abstraction allows plugging in the real system clock or a mocked time
/// source in tests. The unit is **milliseconds** since the Unix epoch; the
/// values end up in `createdAt`/`completedAt` fields and drive TTL reaping.
///
/// # Example
///
/// ```
/// use courier::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource: Send + Sync {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> u64;
}

/// A [`TimeSource`] reading [`SystemTime::now`].
///
/// Clocks set before 1970 report `0`.
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}
