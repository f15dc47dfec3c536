//! *bamcodec* is a crate with streaming codecs for BAM and FASTQ,
//! written completely in Rust.
//!
//! ## Overview
//!
//! The crate is built out of small pollable [transforms](transform/index.html)
//! that compose into two pipelines:
//!
//! * decoding: gzip bytes -> [inflater](gzip/struct.Inflate.html) ->
//! [raw record parser](raw/struct.Parser.html) ->
//! [expander](expand/struct.Expander.html) -> [items](enum.Item.html);
//! * encoding: items -> [downgrader](expand/struct.Downgrader.html) ->
//! [raw record encoder](raw/struct.Encoder.html) ->
//! [deflater](gzip/struct.Deflate.html) -> gzip bytes.
//!
//! [BamReader](bam_reader/struct.BamReader.html) and
//! [BamWriter](bam_writer/struct.BamWriter.html) drive the pipelines over
//! `io::Read`/`io::Write` streams. An [item](enum.Item.html) is a typed
//! header line, the reference dictionary (emitted exactly once, before the
//! first alignment) or a fully decoded [alignment](record/struct.Alignment.html).
//!
//! The [fastq](fastq/index.html) module provides the matching line-oriented
//! codec for FASTQ, including a Casava 1.8+ read name parser.
//!
//! Decoding errors are values in the output stream, not panics: every layer
//! keeps its own error type and the first error ends the stream.
//!
//! ## Usage
//!
//! The following code reads `in.bam` and copies it to `out.bam`, dropping
//! secondary alignments along the way.
//!
//! ```rust,no_run
//! use bamcodec::{BamReader, BamWriter, Item, ItemWriter};
//!
//! fn main() {
//!     let reader = BamReader::from_path("in.bam").unwrap();
//!     let mut writer = BamWriter::from_path("out.bam").unwrap();
//!     for item in reader {
//!         match item.unwrap() {
//!             Item::Alignment(aln) => {
//!                 if !aln.flag.is_secondary() {
//!                     writer.write(Item::Alignment(aln)).unwrap();
//!                 }
//!             }
//!             item => writer.write(item).unwrap(),
//!         }
//!     }
//!     writer.finish().unwrap();
//! }
//! ```
//!
//! Records can also be built from scratch:
//!
//! ```rust,no_run
//! use bamcodec::{BamWriter, Item, ItemWriter};
//! use bamcodec::header::{HeaderLine, ReferenceSequence, SortOrder};
//! use bamcodec::record::{Alignment, Reference, SequenceValue, PhredScore};
//!
//! fn main() {
//!     let dictionary = vec![ReferenceSequence::new("chr1", 10000)];
//!     let mut writer = BamWriter::from_path("out.bam").unwrap();
//!     writer.write(Item::Header(HeaderLine::Head {
//!         version: "1.6".to_string(),
//!         sort_order: SortOrder::Unsorted,
//!         extra: Vec::new(),
//!     })).unwrap();
//!     writer.write(Item::ReferenceSequenceDictionary(dictionary.clone())).unwrap();
//!
//!     let mut record = Alignment::new("Read_1");
//!     record.flag.set_mapped(true);
//!     record.reference = Reference::Sequence(dictionary[0].clone());
//!     record.position = Some(11);
//!     record.sequence = SequenceValue::Text("ACGT".to_string());
//!     record.qualities = (0..4).map(|_| PhredScore::from_raw(30)).collect();
//!     writer.write(Item::Alignment(record)).unwrap();
//!     writer.finish().unwrap();
//! }
//! ```

pub mod bam_reader;
pub mod bam_writer;
pub mod expand;
pub mod fastq;
pub mod gzip;
pub mod header;
pub mod raw;
pub mod record;
pub mod transform;

pub use bam_reader::{BamReader, ReadError};
pub use bam_writer::{BamWriter, WriteError};
pub use expand::Item;
pub use fastq::{FastqReader, FastqRecord, FastqWriter};
pub use header::{HeaderLine, ReferenceSequence};
pub use record::Alignment;

/// A trait for writing stream items: BAM [items](enum.Item.html) or
/// [FASTQ records](fastq/struct.FastqRecord.html).
pub trait ItemWriter<T> {
    type Error;

    /// Writes a single item.
    fn write(&mut self, item: T) -> Result<(), Self::Error>;

    /// Finishes the stream, same as `std::mem::drop(writer)`, but can return
    /// an error.
    fn finish(&mut self) -> Result<(), Self::Error>;

    /// Flushes contents.
    fn flush(&mut self) -> Result<(), Self::Error>;
}
