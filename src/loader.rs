use std::fs::File;
use std::io::{self, prelude::*, BufReader};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use tracing::{debug, info};

use crate::error::LoadError;
use crate::memory::MEMORY_SIZE;

/// A program image: big-endian words, the first of which is the load origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub origin: u16,
    pub words: Vec<u16>,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        info!("input image: {}", path.display());
        let file = File::open(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read(BufReader::new(file))
    }

    /// Decode an image from a byte stream.
    ///
    /// A dangling odd byte at the end of the stream is dropped. Images that would run past the
    /// top of memory are rejected rather than wrapped.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, LoadError> {
        let origin = reader.read_u16::<BigEndian>().map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => LoadError::MissingOrigin,
            _ => LoadError::Read(e),
        })?;

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(LoadError::Read)?;
        if buf.len() % 2 != 0 {
            debug!("ignoring trailing byte at end of image");
        }
        let words: Vec<u16> = buf.chunks_exact(2).map(BigEndian::read_u16).collect();

        let image = Image { origin, words };
        image.check_fits()?;
        info!("origin: {:#06x}, {} words", origin, image.words.len());
        Ok(image)
    }

    /// Fail unless every word lands below the top of memory.
    pub fn check_fits(&self) -> Result<(), LoadError> {
        if self.origin as usize + self.words.len() > MEMORY_SIZE {
            return Err(LoadError::TooLarge {
                origin: self.origin,
                words: self.words.len(),
            });
        }
        Ok(())
    }
}
