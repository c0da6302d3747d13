use crate::virtual_machine::errors::VMError;

/// Flat byte-addressable arena.
///
/// Holds the loaded image at address 0, the free region after it, and the
/// stack growing down from the end. Nothing partitions the arena, but every
/// access is bounds-checked.
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Allocates a zeroed arena of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns `len` bytes starting at `address`.
    pub fn slice(&self, address: u64, len: usize) -> Result<&[u8], VMError> {
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    /// Copies `data` into the arena at `address`.
    pub fn store(&mut self, address: u64, data: &[u8]) -> Result<(), VMError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads a little-endian value of `size` bytes, zero-extended.
    pub fn read(&self, address: u64, size: usize) -> Result<u64, VMError> {
        let mut word = [0u8; 8];
        word[..size].copy_from_slice(self.slice(address, size)?);
        Ok(u64::from_le_bytes(word))
    }

    /// Writes the low `size` bytes of `value` little-endian.
    pub fn write(&mut self, address: u64, value: u64, size: usize) -> Result<(), VMError> {
        self.store(address, &value.to_le_bytes()[..size])
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, VMError> {
        let out_of_bounds = || VMError::MemoryOutOfBounds {
            address,
            size: len,
            len: self.bytes.len(),
        };
        let start = usize::try_from(address).map_err(|_| out_of_bounds())?;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(out_of_bounds()),
        }
    }
}
