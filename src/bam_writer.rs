//! Consecutive BAM writer.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::expand::{DowngradeError, Downgrader, Item};
use crate::gzip::Deflate;
use crate::raw::Encoder;
use crate::transform::{Compose, ComposeError, Next, Transform};
use crate::ItemWriter;

/// Error of the BAM writing pipeline.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Downgrade(#[from] DowngradeError),
}

type Pipeline = Compose<Compose<Downgrader, Encoder>, Deflate>;

impl
    From<
        ComposeError<
            ComposeError<DowngradeError, std::convert::Infallible>,
            std::convert::Infallible,
        >,
    > for WriteError
{
    fn from(
        e: ComposeError<
            ComposeError<DowngradeError, std::convert::Infallible>,
            std::convert::Infallible,
        >,
    ) -> WriteError {
        match e {
            ComposeError::Left(ComposeError::Left(e)) => WriteError::Downgrade(e),
            ComposeError::Left(ComposeError::Right(e)) => match e {},
            ComposeError::Right(e) => match e {},
        }
    }
}

/// [BamWriter](struct.BamWriter.html) builder. Allows to specify the
/// compression level.
pub struct BamWriterBuilder {
    compression: flate2::Compression,
}

impl BamWriterBuilder {
    pub fn new() -> Self {
        Self {
            compression: flate2::Compression::new(6),
        }
    }

    /// Specify compression level from 0 to 9, where 0 represents no
    /// compression, and 9 represents maximal compression. The builder uses 6
    /// as default.
    pub fn compression_level(&mut self, level: u8) -> &mut Self {
        assert!(level <= 9, "Maximal compression level is 9");
        self.compression = flate2::Compression::new(u32::from(level));
        self
    }

    /// Creates a writer to a stream. Preferably the stream should be wrapped
    /// in a buffer writer, such as `BufWriter`.
    pub fn from_stream<W: Write>(&self, stream: W) -> BamWriter<W> {
        let pipeline = Compose::new(
            Compose::new(Downgrader::new(), Encoder::new()),
            Deflate::with_compression(self.compression),
        );
        BamWriter {
            stream,
            pipeline,
            finished: false,
        }
    }

    /// Creates a writer to a BAM file.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> io::Result<BamWriter<BufWriter<File>>> {
        let file = File::create(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!(
                    "Failed to create BAM file {}: {}",
                    path.as_ref().display(),
                    e
                ),
            )
        })?;
        Ok(self.from_stream(BufWriter::new(file)))
    }
}

impl Default for BamWriterBuilder {
    fn default() -> Self {
        BamWriterBuilder::new()
    }
}

/// Writes a gzip-compressed BAM stream from
/// [items](../expand/enum.Item.html).
///
/// Items must come in stream order: header lines, the reference dictionary,
/// then alignments. The writer drives the pipeline downgrader -> raw record
/// encoder -> gzip deflater.
///
/// ```rust,no_run
/// use bamcodec::{BamWriter, Item, ItemWriter};
/// use bamcodec::header::HeaderLine;
///
/// let mut writer = BamWriter::from_path("out.bam").unwrap();
/// writer.write(Item::Header(HeaderLine::Comment("demo".to_string()))).unwrap();
/// writer.write(Item::ReferenceSequenceDictionary(Vec::new())).unwrap();
/// writer.finish().unwrap();
/// ```
///
/// [finish](../trait.ItemWriter.html#tymethod.finish) flushes the last gzip
/// member and the terminal empty member; dropping the writer finishes it,
/// ignoring errors.
pub struct BamWriter<W: Write> {
    stream: W,
    pipeline: Pipeline,
    finished: bool,
}

impl BamWriter<BufWriter<File>> {
    /// Creates a [builder](struct.BamWriterBuilder.html).
    pub fn build() -> BamWriterBuilder {
        BamWriterBuilder::new()
    }

    /// Creates a writer to a BAM file with default parameters.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        BamWriterBuilder::new().from_path(path)
    }
}

impl<W: Write> BamWriter<W> {
    /// Creates a writer to a stream with default parameters.
    pub fn from_stream(stream: W) -> Self {
        BamWriterBuilder::new().from_stream(stream)
    }

    fn drain(&mut self, stopped: bool) -> Result<(), WriteError> {
        loop {
            match self.pipeline.next(stopped) {
                Next::Ready(Ok(chunk)) => self.stream.write_all(&chunk)?,
                Next::Ready(Err(e)) => return Err(e.into()),
                Next::NotReady | Next::End => return Ok(()),
            }
        }
    }
}

impl<W: Write> ItemWriter<Item> for BamWriter<W> {
    type Error = WriteError;

    /// Writes a single item.
    fn write(&mut self, item: Item) -> Result<(), WriteError> {
        self.pipeline.feed(item);
        self.drain(false)
    }

    /// Finishes the stream, writes the terminal empty gzip member and
    /// flushes the output.
    fn finish(&mut self) -> Result<(), WriteError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        debug!("Finishing BAM stream");
        self.drain(true)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Flushes contents.
    fn flush(&mut self) -> Result<(), WriteError> {
        self.drain(false)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<W: Write> Drop for BamWriter<W> {
    fn drop(&mut self) {
        if !self.finished {
            let _ignore = self.finish();
        }
    }
}
