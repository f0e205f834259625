use crate::CatalogueError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Access mode flags for register accessors.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Raw access: disable any conversion from the original hardware data
    /// type into the requested user type. Requesting an accessor with a user
    /// type unequal to the actual raw data type fails with a logic error.
    ///
    /// Note: using this flag makes the calling code intrinsically dependent
    /// on the backend type, since the actual raw data type must be known.
    Raw,

    /// Make any read blocking until new data has arrived since the last
    /// read. Not all registers (and backends) support this flag, in which
    /// case requesting an accessor with it fails with a logic error.
    WaitForNewData,
}

impl AccessMode {
    /// The textual form used in the serialised flag list.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Raw => "raw",
            AccessMode::WaitForNewData => "wait_for_new_data",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = CatalogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(AccessMode::Raw),
            "wait_for_new_data" => Ok(AccessMode::WaitForNewData),
            other => Err(CatalogueError::UnknownAccessModeFlag(other.to_owned())),
        }
    }
}

/// An ordered set of [`AccessMode`] flags.
///
/// The set compares with set equality and carries a total order so it can be
/// used as a map key. It round-trips through a comma-separated textual form
/// via [`AccessModeFlags::serialize`] and [`AccessModeFlags::deserialize`].
#[derive(
    Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccessModeFlags {
    flags: BTreeSet<AccessMode>,
}

impl AccessModeFlags {
    /// Creates a flag set from any collection of flags.
    pub fn new(flags: impl IntoIterator<Item = AccessMode>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    /// The empty flag set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks whether the given flag is in the set.
    pub fn has(&self, flag: AccessMode) -> bool {
        self.flags.contains(&flag)
    }

    /// Checks whether no flag is set.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Adds the given flag to the set.
    pub fn add(&mut self, flag: AccessMode) {
        self.flags.insert(flag);
    }

    /// Removes the given flag from the set.
    pub fn remove(&mut self, flag: AccessMode) {
        self.flags.remove(&flag);
    }

    /// Returns a copy of the set without the given flag.
    pub fn without(&self, flag: AccessMode) -> Self {
        let mut copy = self.clone();
        copy.remove(flag);
        copy
    }

    /// Iterates over the flags in their canonical order.
    pub fn iter(&self) -> impl Iterator<Item = AccessMode> + '_ {
        self.flags.iter().copied()
    }

    /// Fails if the set contains any flag not listed in `known_flags`.
    pub fn check_for_unknown_flags(
        &self,
        known_flags: &[AccessMode],
    ) -> Result<(), CatalogueError> {
        for flag in &self.flags {
            if !known_flags.contains(flag) {
                return Err(CatalogueError::UnknownAccessModeFlag(
                    flag.as_str().to_owned(),
                ));
            }
        }
        Ok(())
    }

    /// Produces the comma-separated list of all flag strings in the set.
    pub fn serialize(&self) -> String {
        self.flags
            .iter()
            .map(AccessMode::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a comma-separated list of flag strings. Unknown flag names
    /// fail with [`CatalogueError::UnknownAccessModeFlag`].
    pub fn deserialize(list: &str) -> Result<Self, CatalogueError> {
        if list.is_empty() {
            return Ok(Self::default());
        }
        let mut flags = BTreeSet::new();
        for name in list.split(',') {
            flags.insert(name.parse::<AccessMode>()?);
        }
        Ok(Self { flags })
    }
}

impl fmt::Display for AccessModeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for AccessModeFlags {
    type Err = CatalogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::deserialize(s)
    }
}

impl FromIterator<AccessMode> for AccessModeFlags {
    fn from_iter<I: IntoIterator<Item = AccessMode>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_representable_sets() {
        let sets = [
            AccessModeFlags::empty(),
            AccessModeFlags::new([AccessMode::Raw]),
            AccessModeFlags::new([AccessMode::WaitForNewData]),
            AccessModeFlags::new([AccessMode::Raw, AccessMode::WaitForNewData]),
        ];
        for set in sets {
            assert_eq!(AccessModeFlags::deserialize(&set.serialize()).unwrap(), set);
        }
    }

    #[test]
    fn serialised_form() {
        let flags = AccessModeFlags::new([AccessMode::WaitForNewData, AccessMode::Raw]);
        assert_eq!(flags.serialize(), "raw,wait_for_new_data");
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert_eq!(
            AccessModeFlags::deserialize("raw,bogus"),
            Err(CatalogueError::UnknownAccessModeFlag("bogus".to_owned()))
        );
        assert!(AccessModeFlags::deserialize(",raw").is_err());
    }

    #[test]
    fn set_operations() {
        let mut flags = AccessModeFlags::empty();
        assert!(!flags.has(AccessMode::Raw));
        flags.add(AccessMode::Raw);
        flags.add(AccessMode::Raw);
        assert!(flags.has(AccessMode::Raw));
        flags.remove(AccessMode::Raw);
        assert!(flags.is_empty());
    }

    #[test]
    fn ordering_is_total() {
        let a = AccessModeFlags::empty();
        let b = AccessModeFlags::new([AccessMode::Raw]);
        let c = AccessModeFlags::new([AccessMode::Raw, AccessMode::WaitForNewData]);
        assert!(a < b && b < c);
    }
}
