//! Object images
//!
//! An LC-3 object file is a raw big-endian byte stream with no magic
//! number and no trailer: the first word is the origin address, and
//! every following word belongs to a single contiguous program image
//! starting at that origin. This module converts between the
//! assembler's word vector and the byte stream, and validates images
//! on the way in.

use thiserror::Error;

use crate::console::Console;
use crate::vm::memory::MEMORY_WORDS;
use crate::vm::Vm;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image is empty (missing origin word)")]
    Empty,
    #[error("image has an odd number of bytes ({0})")]
    OddLength(usize),
    #[error(
        "image of {words} words at origin {origin:#06x} overflows the \
         address space"
    )]
    Overflow { origin: u16, words: usize },
}

/// A validated program image: the origin and the words that follow it
#[derive(Debug, PartialEq, Eq)]
pub struct Image {
    pub origin: u16,
    pub words: Vec<u16>,
}

impl Image {
    /// Parse a big-endian byte stream. The image must hold at least
    /// the origin word, an even number of bytes, and fit between its
    /// origin and the top of the 16-bit address space.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() % 2 != 0 {
            return Err(ImageError::OddLength(bytes.len()));
        }
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }

        let mut words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        let origin = words.next().expect("length checked above");
        let words: Vec<u16> = words.collect();

        if origin as usize + words.len() > MEMORY_WORDS {
            return Err(ImageError::Overflow {
                origin,
                words: words.len(),
            });
        }
        Ok(Self { origin, words })
    }

    /// Copy the image into the machine's memory and point the pc at
    /// the origin
    pub fn load_into<C: Console>(&self, vm: &mut Vm<C>) {
        vm.load(self.origin, &self.words);
    }
}

/// Serialize an assembled word vector (origin header included) as a
/// big-endian byte stream
pub fn serialize(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 * words.len());
    for word in words {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    bytes
}
