//! Consecutive BAM reader.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::expand::{ExpandError, Expander, Item};
use crate::gzip::{Inflate, UnzipError};
use crate::raw::{FramingError, Parser};
use crate::transform::{Compose, ComposeError, Next, Transform};

/// Error of the BAM reading pipeline. Every layer keeps its own type.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Unzip(#[from] UnzipError),
    #[error("{0}")]
    Framing(#[from] FramingError),
    #[error("{0}")]
    Expand(#[from] ExpandError),
}

type Pipeline = Compose<Compose<Inflate, Parser>, Expander>;
type PipelineError = ComposeError<ComposeError<UnzipError, FramingError>, ExpandError>;

impl From<PipelineError> for ReadError {
    fn from(e: PipelineError) -> ReadError {
        match e {
            ComposeError::Left(ComposeError::Left(e)) => ReadError::Unzip(e),
            ComposeError::Left(ComposeError::Right(e)) => ReadError::Framing(e),
            ComposeError::Right(e) => ReadError::Expand(e),
        }
    }
}

/// [BamReader](struct.BamReader.html) builder. Allows to specify the size of
/// the chunks pulled from the input stream.
pub struct BamReaderBuilder {
    chunk_size: usize,
}

impl BamReaderBuilder {
    pub fn new() -> Self {
        Self { chunk_size: 65536 }
    }

    /// Sets the input chunk size in bytes (65536 by default).
    pub fn chunk_size(&mut self, chunk_size: usize) -> &mut Self {
        assert!(chunk_size > 0, "Chunk size must be positive");
        self.chunk_size = chunk_size;
        self
    }

    /// Creates a reader from a gzip-compressed BAM stream.
    pub fn from_stream<R: Read>(&self, stream: R) -> BamReader<R> {
        let pipeline = Compose::new(
            Compose::new(Inflate::new(), Parser::new()),
            Expander::new(),
        );
        BamReader {
            stream,
            pipeline,
            chunk_size: self.chunk_size,
            stopped: false,
            done: false,
        }
    }

    /// Creates a reader from a BAM file.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> io::Result<BamReader<File>> {
        let file = File::open(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to open BAM file {}: {}", path.as_ref().display(), e),
            )
        })?;
        Ok(self.from_stream(file))
    }
}

impl Default for BamReaderBuilder {
    fn default() -> Self {
        BamReaderBuilder::new()
    }
}

/// Reads a BAM stream consecutively, emitting
/// [items](../expand/enum.Item.html): typed header lines first, the
/// reference dictionary exactly once, then alignments.
///
/// ```rust,no_run
/// let reader = bamcodec::BamReader::from_path("in.bam").unwrap();
/// for item in reader {
///     match item.unwrap() {
///         bamcodec::Item::Alignment(aln) => println!("{}", aln.name),
///         _ => {}
///     }
/// }
/// ```
///
/// The reader drives the pipeline gzip inflater -> raw record parser ->
/// expander: it feeds chunks of the input stream and drains outputs until
/// the pipeline asks for more. The first decoding error ends the stream.
pub struct BamReader<R: Read> {
    stream: R,
    pipeline: Pipeline,
    chunk_size: usize,
    stopped: bool,
    done: bool,
}

impl BamReader<File> {
    /// Creates a [builder](struct.BamReaderBuilder.html).
    pub fn build() -> BamReaderBuilder {
        BamReaderBuilder::new()
    }

    /// Opens a reader from a BAM file with default parameters.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        BamReaderBuilder::new().from_path(path)
    }
}

impl<R: Read> BamReader<R> {
    /// Creates a reader from a gzip-compressed BAM stream with default
    /// parameters.
    pub fn from_stream(stream: R) -> Self {
        BamReaderBuilder::new().from_stream(stream)
    }
}

impl<R: Read> Iterator for BamReader<R> {
    type Item = Result<Item, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.pipeline.next(self.stopped) {
                Next::Ready(Ok(item)) => return Some(Ok(item)),
                Next::Ready(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Next::End => {
                    self.done = true;
                    return None;
                }
                Next::NotReady => {
                    if self.stopped {
                        // All transforms drain on stop; nothing more can come.
                        self.done = true;
                        return None;
                    }
                    let mut chunk = vec![0_u8; self.chunk_size];
                    match self.stream.read(&mut chunk) {
                        Ok(0) => {
                            debug!("BAM input stream ended");
                            self.stopped = true;
                        }
                        Ok(n) => {
                            chunk.truncate(n);
                            self.pipeline.feed(chunk);
                        }
                        Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
    }
}
