//! Executable image format.
//!
//! ```text
//! [code_len: u64 LE] [entry: u64 LE] [code: code_len bytes]
//! ```
//!
//! `entry` is the byte offset of the `start` label inside `code` (0 without one).
//! The whole image, header included, is loaded at arena address 0, so code
//! offsets become addresses by adding [`HEADER_LEN`].

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use crate::virtual_machine::errors::VMError;
use std::fs;
use std::path::Path;

/// Size of the image header.
pub const HEADER_LEN: usize = 16;

/// Assembled program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Image {
    /// Entry point as a code offset.
    pub entry: u64,
    /// Encoded instructions.
    pub code: Vec<u8>,
}

impl Image {
    pub fn new(code: Vec<u8>, entry: u64) -> Self {
        Self { entry, code }
    }

    /// Total length of the serialized image.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Arena address of the entry point.
    pub fn entry_address(&self) -> u64 {
        HEADER_LEN as u64 + self.entry
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_vec()
    }

    /// Parses a serialized image, requiring the length to match the header exactly.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VMError> {
        if bytes.len() < HEADER_LEN {
            return Err(VMError::InvalidImage {
                reason: format!(
                    "{} bytes is shorter than the {HEADER_LEN}-byte header",
                    bytes.len()
                ),
            });
        }
        Ok(<Image as Decode>::from_bytes(bytes)?)
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, VMError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| VMError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()).map_err(|source| VMError::IoError {
            path: path.display().to_string(),
            source,
        })
    }
}

impl Encode for Image {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.code.len() as u64).encode(out);
        self.entry.encode(out);
        out.write(&self.code);
    }
}

impl Decode for Image {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let code_len = u64::decode(input)?;
        let entry = u64::decode(input)?;
        let code_len = usize::try_from(code_len).map_err(|_| DecodeError::UnexpectedEof)?;
        let code = read_bytes(input, code_len)?.to_vec();
        Ok(Self { entry, code })
    }
}
