//! Raw firmware images.
//!
//! An image is the flat `.bin` the bootloader writes to the application
//! region. There is no container format; the whole file is sent as-is.

use {
    crate::{
        error::{Error, Result},
        protocol::crc::crc32,
    },
    log::debug,
    std::{
        fs::File,
        io::{BufReader, Read},
        path::Path,
    },
};

/// Immutable firmware bytes with their precomputed CRC-32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    crc: u32,
}

impl FirmwareImage {
    /// Load an image from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware image from: {}", path.display());

        let read = || -> std::io::Result<Vec<u8>> {
            let mut reader = BufReader::new(File::open(path)?);
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            Ok(data)
        };
        let data = read().map_err(|source| Error::ImageRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_bytes(data)
    }

    /// Wrap bytes already in memory.
    ///
    /// Rejects empty images and images whose length does not fit the 32-bit
    /// size field of START_UPDATE.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyImage);
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::ImageTooLarge { len: data.len() });
        }

        let crc = crc32(&data);
        debug!("Firmware image: {} bytes, CRC32 {crc:#010X}", data.len());
        Ok(Self { data, crc })
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`; empty images are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image length as sent in START_UPDATE.
    #[allow(clippy::cast_possible_truncation)] // Length checked in from_bytes
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// CRC-32 of the whole image.
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Number of DATA frames needed at `chunk_size` bytes per frame.
    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        self.data.len().div_ceil(chunk_size.max(1))
    }

    /// Iterate `(offset, chunk)` pairs in transfer order.
    #[allow(clippy::cast_possible_truncation)] // Length checked in from_bytes
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = (u32, &[u8])> {
        let chunk_size = chunk_size.max(1);
        self.data
            .chunks(chunk_size)
            .enumerate()
            .map(move |(i, chunk)| ((i * chunk_size) as u32, chunk))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write, tempfile::NamedTempFile};

    #[test]
    fn test_from_bytes_computes_crc() {
        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        assert_eq!(image.size(), 9);
        assert_eq!(image.crc(), 0xCBF43926);
    }

    #[test]
    fn test_empty_image_rejected() {
        assert!(matches!(
            FirmwareImage::from_bytes(Vec::new()),
            Err(Error::EmptyImage)
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xA5; 700]).unwrap();
        file.flush().unwrap();

        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.len(), 700);
        assert_eq!(image.crc(), crc32(&[0xA5; 700]));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = FirmwareImage::from_file("/nonexistent/app.bin").unwrap_err();
        assert!(matches!(err, Error::ImageRead { .. }));
        assert!(err.to_string().contains("/nonexistent/app.bin"));
    }

    #[test]
    fn test_chunks_cover_image() {
        let image = FirmwareImage::from_bytes(vec![0x11; 1300]).unwrap();
        let chunks: Vec<_> = image.chunks(512).collect();
        assert_eq!(image.chunk_count(512), 3);
        assert_eq!(
            chunks.iter().map(|(off, c)| (*off, c.len())).collect::<Vec<_>>(),
            vec![(0, 512), (512, 512), (1024, 276)]
        );
    }

    #[test]
    fn test_exact_multiple_has_full_last_chunk() {
        let image = FirmwareImage::from_bytes(vec![0; 1024]).unwrap();
        assert_eq!(image.chunk_count(512), 2);
        assert_eq!(image.chunks(512).last().map(|(_, c)| c.len()), Some(512));
    }
}
