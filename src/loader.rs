//! Loading object images into memory.
//!
//! An object file is a sequence of big-endian 16-bit words: the first word
//! is the origin address, and the remaining words are the contiguous
//! contents to place there. (Big-endian is the wire format, so the loader
//! byte-swaps on little-endian hosts.)

use std::path::Path;
use std::{fs, io};

use tracing::debug;

/// A parsed object image: an origin address and the words placed there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjImage {
    origin: u16,
    words: Vec<u16>,
}

impl ObjImage {
    /// Parses an object image from its raw bytes.
    ///
    /// Contents that would run past the top of the address space are
    /// truncated; a trailing odd byte is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut words = bytes.chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

        let origin = words.next().ok_or(LoadError::NoOrigin)?;
        let capacity = (1usize << 16) - usize::from(origin);
        let words: Vec<_> = words.take(capacity).collect();

        Ok(Self { origin, words })
    }

    /// Reads and parses the object file at `path`.
    pub fn read_file(path: &Path) -> Result<Self, LoadError> {
        let bytes = fs::read(path).map_err(LoadError::Io)?;
        let image = Self::parse(&bytes)?;
        debug!(
            "loaded {}: origin x{:04X}, {} words",
            path.display(), image.origin, image.words.len(),
        );
        Ok(image)
    }

    /// The address the image's contents are placed at.
    pub fn origin(&self) -> u16 {
        self.origin
    }

    /// The image's contents.
    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

/// The errors that can result from loading an object file.
#[derive(Debug)]
pub enum LoadError {
    /// The file was too short to hold an origin word.
    NoOrigin,
    /// The file could not be read at all.
    Io(io::Error),
}
impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::NoOrigin => f.write_str("object file has no origin word"),
            LoadError::Io(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::NoOrigin => None,
            LoadError::Io(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadError, ObjImage};

    #[test]
    fn parse_big_endian() {
        let image = ObjImage::parse(&[0x30, 0x00, 0x12, 0x3D, 0xAB, 0xCD]).unwrap();
        assert_eq!(image.origin(), 0x3000);
        assert_eq!(image.words(), [0x123D, 0xABCD]);
    }

    #[test]
    fn parse_ignores_trailing_odd_byte() {
        let image = ObjImage::parse(&[0x30, 0x00, 0x00, 0x01, 0xFF]).unwrap();
        assert_eq!(image.words(), [0x0001]);
    }

    #[test]
    fn parse_empty_is_an_error() {
        assert!(matches!(ObjImage::parse(&[]), Err(LoadError::NoOrigin)));
        assert!(matches!(ObjImage::parse(&[0x30]), Err(LoadError::NoOrigin)));
    }

    #[test]
    fn parse_truncates_at_address_space_end() {
        // origin xFFFF leaves room for exactly one word
        let image = ObjImage::parse(&[0xFF, 0xFF, 0x00, 0x01, 0x00, 0x02]).unwrap();
        assert_eq!(image.origin(), 0xFFFF);
        assert_eq!(image.words(), [0x0001]);
    }

    #[test]
    fn read_file_reports_io_errors() {
        let err = ObjImage::read_file("does/not/exist.obj".as_ref()).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn loader_round_trip() {
        use crate::sim::Simulator;

        let image = ObjImage::parse(&[0x40, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let mut sim = Simulator::new();
        sim.load_obj(&image);
        for (i, &w) in image.words().iter().enumerate() {
            assert_eq!(sim.mem.get_raw(image.origin() + i as u16), w);
        }
    }
}
