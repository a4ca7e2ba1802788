use folio_config::SyncConfig;
use std::time::Duration;
use time::OffsetDateTime;

/// Decides whether a local archive needs to be downloaded again.
pub trait Staleness: Send + Sync {
    fn is_stale(&self, local: OffsetDateTime, remote: OffsetDateTime) -> bool;
}

impl<F> Staleness for F
where
    F: Fn(OffsetDateTime, OffsetDateTime) -> bool + Send + Sync,
{
    fn is_stale(&self, local: OffsetDateTime, remote: OffsetDateTime) -> bool {
        self(local, remote)
    }
}

/// Stale once the remote export is more than `tolerance` newer than the
/// local file.
///
/// Archive modification times can come from the server and land very close
/// to the export timestamps, hence the tolerance.
///
/// ```
/// use folio_library::plan::{Staleness, TimestampStaleness};
/// use time::macros::datetime;
///
/// let staleness = TimestampStaleness::default();
/// let local = datetime!(2024-03-01 00:00 UTC);
/// assert!(!staleness.is_stale(local, datetime!(2024-03-01 05:00 UTC)));
/// assert!(staleness.is_stale(local, datetime!(2024-03-01 07:00 UTC)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampStaleness {
    tolerance: Duration,
}

impl TimestampStaleness {
    pub const fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }
}

impl Default for TimestampStaleness {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for TimestampStaleness {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.staleness_tolerance())
    }
}

impl Staleness for TimestampStaleness {
    fn is_stale(&self, local: OffsetDateTime, remote: OffsetDateTime) -> bool {
        remote - local > self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[rstest]
    #[case(datetime!(2024-03-01 12:00 UTC), false)]
    #[case(datetime!(2024-03-01 18:00 UTC), false)]
    #[case(datetime!(2024-03-01 18:00:01 UTC), true)]
    #[case(datetime!(2024-02-01 00:00 UTC), false)]
    fn test_tolerance(#[case] remote: OffsetDateTime, #[case] expected: bool) {
        let local = datetime!(2024-03-01 12:00 UTC);
        assert_eq!(TimestampStaleness::default().is_stale(local, remote), expected);
    }

    #[test]
    fn test_configured_tolerance() {
        let config = SyncConfig { staleness_tolerance_hours: 1, ..SyncConfig::default() };
        let staleness = TimestampStaleness::from(&config);
        let local = datetime!(2024-03-01 12:00 UTC);
        assert!(staleness.is_stale(local, datetime!(2024-03-01 13:30 UTC)));
        assert!(!TimestampStaleness::default().is_stale(local, datetime!(2024-03-01 13:30 UTC)));
    }

    #[test]
    fn test_closure() {
        let always = |_: OffsetDateTime, _: OffsetDateTime| true;
        assert!(always.is_stale(OffsetDateTime::UNIX_EPOCH, OffsetDateTime::UNIX_EPOCH));
    }
}
