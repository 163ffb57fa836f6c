//! Binary node record format.
//!
//! A stream is a sequence of self-delimiting records followed by a
//! negative-count sentinel, so readers never need a record count up front.
//!
//! - [`varint`] - 7-bit variable-length integers
//! - [`writer`] - [`NodeStreamWriter`]
//! - [`reader`] - [`NodeStreamReader`]
//!
//! Files whose name ends in `.lz4` are wrapped in LZ4 frames and files ending
//! in `.zst` in zstd framing; the record format inside is identical. There is
//! no in-band flag, so writer and reader agree through the file name.

pub mod reader;
pub mod varint;
pub mod writer;

pub use reader::NodeStreamReader;
pub use writer::{NodeStreamWriter, SENTINEL};

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::CodecError;

/// File extension that selects LZ4 frame format
pub const LZ4_EXTENSION: &str = "lz4";

/// File extension that selects zstd framing
pub const ZSTD_EXTENSION: &str = "zst";

/// Buffer size for file-backed readers and writers
const FILE_BUFFER: usize = 256 * 1024;

/// Compression framing around a record stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Raw records
    None,
    /// LZ4 frame format
    Lz4,
    /// zstd frames
    Zstd,
}

impl CompressionFormat {
    /// Pick the framing from a file name
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(LZ4_EXTENSION) => CompressionFormat::Lz4,
            Some(ext) if ext.eq_ignore_ascii_case(ZSTD_EXTENSION) => CompressionFormat::Zstd,
            _ => CompressionFormat::None,
        }
    }
}

/// Output sink for a flat file or spilled run
pub enum FileSink {
    /// Uncompressed file
    Plain(BufWriter<File>),
    /// LZ4-framed file
    Lz4(lz4_flex::frame::FrameEncoder<BufWriter<File>>),
    /// zstd-compressed file
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FileSink::Plain(w) => w.write(buf),
            FileSink::Lz4(w) => w.write(buf),
            FileSink::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FileSink::Plain(w) => w.flush(),
            FileSink::Lz4(w) => w.flush(),
            FileSink::Zstd(w) => w.flush(),
        }
    }
}

impl FileSink {
    /// Finish the compression frame (if any) and sync the file to disk
    pub fn close(self) -> std::io::Result<()> {
        let mut inner = match self {
            FileSink::Plain(w) => w,
            FileSink::Lz4(w) => w.finish().map_err(std::io::Error::from)?,
            FileSink::Zstd(w) => w.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_all()
    }
}

/// Create a record writer for `path`, framed according to its extension
///
/// `zstd_level` only applies to `.zst` files.
pub fn create_file(path: &Path, zstd_level: i32) -> Result<NodeStreamWriter<FileSink>, CodecError> {
    let file = BufWriter::with_capacity(FILE_BUFFER, File::create(path).map_err(CodecError::Io)?);
    let sink = match CompressionFormat::from_path(path) {
        CompressionFormat::None => FileSink::Plain(file),
        CompressionFormat::Lz4 => FileSink::Lz4(lz4_flex::frame::FrameEncoder::new(file)),
        CompressionFormat::Zstd => {
            FileSink::Zstd(zstd::Encoder::new(file, zstd_level).map_err(CodecError::Io)?)
        }
    };
    Ok(NodeStreamWriter::new(sink))
}

impl NodeStreamWriter<FileSink> {
    /// Write the sentinel, finish framing and sync; returns the record count
    pub fn close(self) -> Result<u64, CodecError> {
        let records = self.records();
        self.finish()?.close().map_err(CodecError::Io)?;
        Ok(records)
    }
}

/// Boxed input used by file-backed readers
pub type FileSource = Box<dyn Read + Send>;

/// Open a record reader for `path`, expecting the framing its extension names
pub fn open_file(path: &Path) -> Result<NodeStreamReader<FileSource>, CodecError> {
    let file = File::open(path).map_err(CodecError::Io)?;
    let input: FileSource = match CompressionFormat::from_path(path) {
        CompressionFormat::None => Box::new(BufReader::with_capacity(FILE_BUFFER, file)),
        CompressionFormat::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(
            BufReader::with_capacity(FILE_BUFFER, file),
        )),
        CompressionFormat::Zstd => Box::new(zstd::Decoder::new(file).map_err(CodecError::Io)?),
    };
    Ok(NodeStreamReader::new(input))
}
