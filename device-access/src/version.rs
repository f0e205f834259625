use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global source of version numbers. Starts at 1; the value 0 is reserved
/// for [`VersionNumber::NULL`].
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// An opaque, totally ordered token tagging each successful transfer.
///
/// Version numbers are drawn from a process-wide monotone generator: every
/// call to [`VersionNumber::new`] returns a version strictly greater than
/// all versions obtained before, across all threads and all accessors. The
/// distinguished [`VersionNumber::NULL`] compares less than every real
/// version and is the initial version of every accessor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// The null version, smaller than any version returned by
    /// [`VersionNumber::new`].
    pub const NULL: VersionNumber = VersionNumber(0);

    /// Obtains a fresh version, strictly greater than all versions obtained
    /// so far in this process.
    pub fn new() -> Self {
        VersionNumber(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether this is the null version.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        VersionNumber::new()
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("v(null)")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_smallest() {
        let version = VersionNumber::new();
        assert!(VersionNumber::NULL < version);
        assert!(VersionNumber::NULL.is_null());
        assert!(!version.is_null());
    }

    #[test]
    fn strictly_monotone() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        let c = VersionNumber::default();
        assert!(a < b && b < c);
    }

    #[test]
    fn monotone_across_threads() {
        let before = VersionNumber::new();
        let from_thread = std::thread::spawn(VersionNumber::new).join().unwrap();
        let after = VersionNumber::new();
        assert!(before < from_thread);
        assert!(from_thread < after);
    }
}
