use crate::{AccessMode, AccessModeFlags, CatalogueError, DataDescriptor, RegisterPath};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identifies one interrupt line of a device: the interrupt controller and
/// the interrupt index within that controller.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InterruptId {
    /// Interrupt controller number.
    pub controller: u32,
    /// Interrupt number within the controller.
    pub index: u32,
}

impl InterruptId {
    /// Creates an interrupt id from controller and index.
    pub fn new(controller: u32, index: u32) -> Self {
        Self { controller, index }
    }
}

impl fmt::Display for InterruptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.index)
    }
}

/// Whether a register can be read, written, or both.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAccess {
    /// The register can only be read.
    ReadOnly,
    /// The register can only be written.
    WriteOnly,
    /// The register can be read and written.
    ReadWrite,
}

impl RegisterAccess {
    /// Whether reads are allowed.
    pub fn is_readable(&self) -> bool {
        matches!(self, RegisterAccess::ReadOnly | RegisterAccess::ReadWrite)
    }

    /// Whether writes are allowed.
    pub fn is_writeable(&self) -> bool {
        matches!(self, RegisterAccess::WriteOnly | RegisterAccess::ReadWrite)
    }
}

/// Description of a single register.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterInfo {
    /// The hierarchical register name.
    pub path: RegisterPath,
    /// Byte address of the first element within the device address space.
    pub address: u64,
    /// Number of elements (samples) per channel.
    pub elements: usize,
    /// Number of channels.
    pub channels: usize,
    /// Cooked and raw element types.
    pub descriptor: DataDescriptor,
    /// Read/write capability.
    pub access: RegisterAccess,
    /// Access mode flags this register supports.
    pub supported_flags: AccessModeFlags,
    /// The interrupt delivering updates for this register, if the register
    /// supports push-type reads.
    pub interrupt: Option<InterruptId>,
}

impl RegisterInfo {
    /// Creates a read-write scalar-channel int32 register description with
    /// raw support. Use the `with_*` methods to adjust the defaults.
    pub fn new(path: impl Into<RegisterPath>, address: u64, elements: usize) -> Self {
        Self {
            path: path.into(),
            address,
            elements,
            channels: 1,
            descriptor: DataDescriptor::int32(),
            access: RegisterAccess::ReadWrite,
            supported_flags: AccessModeFlags::new([AccessMode::Raw]),
            interrupt: None,
        }
    }

    /// Sets the read/write capability.
    pub fn with_access(mut self, access: RegisterAccess) -> Self {
        self.access = access;
        self
    }

    /// Sets the number of channels.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the data descriptor.
    pub fn with_descriptor(mut self, descriptor: DataDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Associates the register with an interrupt and marks it as supporting
    /// `wait_for_new_data`.
    pub fn with_interrupt(mut self, interrupt: InterruptId) -> Self {
        self.interrupt = Some(interrupt);
        self.supported_flags.add(AccessMode::WaitForNewData);
        self
    }
}

/// The register catalogue of one device.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegisterCatalogue {
    registers: BTreeMap<RegisterPath, RegisterInfo>,
}

impl RegisterCatalogue {
    /// Creates an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a register description.
    pub fn add_register(&mut self, info: RegisterInfo) {
        self.registers.insert(info.path.clone(), info);
    }

    /// Looks up a register by path.
    pub fn get(&self, path: &RegisterPath) -> Option<&RegisterInfo> {
        self.registers.get(path)
    }

    /// Looks up a register by path, failing with
    /// [`CatalogueError::UnknownRegister`] if it does not exist.
    pub fn get_or_err(&self, path: &RegisterPath) -> Result<&RegisterInfo, CatalogueError> {
        self.registers
            .get(path)
            .ok_or_else(|| CatalogueError::UnknownRegister(path.clone()))
    }

    /// Iterates over all registers in path order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.registers.values()
    }

    /// Number of registers in the catalogue.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the catalogue contains no registers.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// All interrupt lines referenced by any register.
    pub fn interrupts(&self) -> BTreeSet<InterruptId> {
        self.registers.values().filter_map(|r| r.interrupt).collect()
    }

    /// Whether any register is associated with the given interrupt.
    pub fn has_interrupt(&self, interrupt: InterruptId) -> bool {
        self.registers.values().any(|r| r.interrupt == Some(interrupt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lookup() {
        let mut catalogue = RegisterCatalogue::new();
        catalogue.add_register(RegisterInfo::new("APP/REG", 0x40, 4));
        assert_eq!(catalogue.len(), 1);
        assert!(catalogue.get(&RegisterPath::new("APP/REG")).is_some());
        assert!(catalogue
            .get_or_err(&RegisterPath::new("APP/OTHER"))
            .is_err());
    }

    #[test]
    fn interrupt_table() {
        let mut catalogue = RegisterCatalogue::new();
        catalogue.add_register(
            RegisterInfo::new("PUSH/REG", 0, 1).with_interrupt(InterruptId::new(0, 3)),
        );
        catalogue.add_register(RegisterInfo::new("PLAIN", 4, 1));
        assert!(catalogue.has_interrupt(InterruptId::new(0, 3)));
        assert!(!catalogue.has_interrupt(InterruptId::new(1, 0)));
        assert_eq!(catalogue.interrupts().len(), 1);
        let info = catalogue.get(&RegisterPath::new("PUSH/REG")).unwrap();
        assert!(info.supported_flags.has(AccessMode::WaitForNewData));
    }
}
