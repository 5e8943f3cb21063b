//! File access helpers shared by every table reader and writer.

use crate::data::format::Compression;
use crate::error::{ProfilingError, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a file for reading, transparently decompressing gzip content.
///
/// Compression is detected from the magic bytes, not the extension, so a
/// `.csv.gz` written without compression still reads back.
pub fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProfilingError::MissingArtifact(path.to_path_buf()),
        _ => ProfilingError::Io(e),
    })?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// A file being written, optionally through a gzip encoder.
///
/// Dropping a writer discards late I/O errors; call [`FileWriter::finish`]
/// to write the gzip trailer and flush everything to disk.
pub enum FileWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileWriter {
    /// Complete the stream and flush it, reporting any failure.
    pub fn finish(self) -> Result<()> {
        let buffered = match self {
            FileWriter::Plain(w) => w,
            FileWriter::Gzip(encoder) => encoder.finish()?,
        };
        buffered.into_inner().map_err(|e| e.into_error())?;
        Ok(())
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FileWriter::Plain(w) => w.write(buf),
            FileWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FileWriter::Plain(w) => w.flush(),
            FileWriter::Gzip(w) => w.flush(),
        }
    }
}

/// Open a file for writing with the requested compression.
///
/// Parent directories are created as needed. Gzip output carries no
/// timestamp or file name so identical content gives identical bytes.
pub fn open_writer(path: &Path, compression: Compression) -> Result<FileWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(path)?);

    match compression {
        Compression::Gzip => Ok(FileWriter::Gzip(
            GzBuilder::new().mtime(0).write(file, flate2::Compression::default()),
        )),
        Compression::None => Ok(FileWriter::Plain(file)),
    }
}

/// Flush a CSV writer and finish the file underneath it.
pub fn finish_csv(writer: csv::Writer<FileWriter>) -> Result<()> {
    let inner = writer.into_inner().map_err(|e| {
        ProfilingError::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
    })?;
    inner.finish()
}

/// Return the first of `candidates` that exists on disk.
pub fn first_existing<'a, P: AsRef<Path>>(candidates: &'a [P]) -> Option<&'a Path> {
    candidates.iter().map(AsRef::as_ref).find(|p| p.is_file())
}
