//! Raw BAM items: the wire-level view of an uncompressed BAM stream.
//!
//! [Parser](struct.Parser.html) turns inflated bytes into
//! [RawItem](enum.RawItem.html)s, consuming only whole records and answering
//! `NotReady` when a record crosses the end of the buffered input.
//! [Encoder](struct.Encoder.html) performs the exact inverse. Neither side
//! interprets CIGAR, sequence text or tags; those stay opaque until the
//! [expander](../expand/index.html) touches them.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::str::from_utf8;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use thiserror::Error;

use crate::header::ReferenceSequence;
use crate::record::Sequence;
use crate::transform::{Next, Transform};

/// First four bytes of any BAM stream.
pub const MAGIC: [u8; 4] = [b'B', b'A', b'M', 1];

/// The reference information block is never buffered past this size.
const REF_INFO_BUFFER_CAP: usize = 50000;

/// Error produced while framing raw BAM records.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FramingError {
    /// The stream does not start with `BAM\x01`. Contains the four bytes
    /// observed instead.
    #[error("wrong BAM magic number {0:?}")]
    WrongMagicNumber([u8; 4]),
    /// A 32-bit length field that cannot be non-negative.
    #[error("cannot decode {0:?} as a 32-bit length")]
    WrongInt32([u8; 4]),
    /// The reference information block exceeds the internal buffer cap.
    #[error(
        "reference information needs {required} bytes, only {buffered} may be buffered"
    )]
    ReferenceInformationOverflow { required: usize, buffered: usize },
    /// A reference name does not end with a null byte.
    #[error("reference name is not null-terminated")]
    ReferenceNameNotNullTerminated,
    /// A read name does not end with a null byte.
    #[error("read name is not null-terminated")]
    ReadNameNotNullTerminated,
    /// The stream stopped inside a record, or a record overruns its own
    /// block size.
    #[error("truncated record: {required} bytes required, {available} available")]
    Truncated { required: usize, available: usize },
    /// A text field holds invalid UTF-8.
    #[error("{0} is not valid UTF-8")]
    NotUtf8(&'static str),
}

/// A single record of the uncompressed BAM layer.
#[derive(Clone, Debug, PartialEq)]
pub enum RawItem {
    /// The SAM header text, before the reference list.
    Header(String),
    /// The reference dictionary stored in the BAM stream itself.
    ReferenceInformation(Vec<ReferenceSequence>),
    /// One alignment block.
    Alignment(RawAlignment),
}

/// An alignment exactly as stored on the wire, fields decoded but not
/// interpreted.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAlignment {
    /// Read name without the trailing null.
    pub name: Vec<u8>,
    pub flag: u16,
    /// 0-based reference id, -1 for unmapped records.
    pub ref_id: i32,
    /// 0-based position, -1 when absent.
    pub pos: i32,
    pub mapq: u8,
    pub bin: u16,
    /// Packed CIGAR blob, `4 * n_cigar_op` bytes.
    pub cigar: Vec<u8>,
    pub mate_ref_id: i32,
    pub mate_pos: i32,
    pub template_len: i32,
    pub seq: Sequence,
    /// `l_seq` quality bytes, 0xff denoting missing values.
    pub qual: Vec<u8>,
    /// Opaque optional-field blob.
    pub tags: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Header,
    RefInfo(usize),
    Alignments,
}

/// Outcome of a parse attempt: a value with the number of consumed bytes, or
/// the total buffer size required to try again.
enum Progress<T> {
    Done(T, usize),
    Needs(usize),
}

fn read_len(bytes: &[u8]) -> Result<usize, FramingError> {
    let value = LittleEndian::read_i32(bytes) as i64;
    if value < 0 {
        Err(FramingError::WrongInt32([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))
    } else {
        Ok(value as usize)
    }
}

fn parse_header(buf: &[u8]) -> Result<Progress<(String, usize)>, FramingError> {
    if buf.len() < 12 {
        return Ok(Progress::Needs(12));
    }
    let magic = [buf[0], buf[1], buf[2], buf[3]];
    if magic != MAGIC {
        return Err(FramingError::WrongMagicNumber(magic));
    }
    let l_text = read_len(&buf[4..8])?;
    let total = 8 + l_text + 4;
    if buf.len() < total {
        return Ok(Progress::Needs(total));
    }
    let text = from_utf8(&buf[8..8 + l_text])
        .map_err(|_| FramingError::NotUtf8("header text"))?
        // Header text may be null-padded on the wire.
        .trim_end_matches('\0')
        .to_string();
    let n_refs = read_len(&buf[8 + l_text..total])?;
    Ok(Progress::Done((text, n_refs), total))
}

fn parse_ref_info(
    buf: &[u8],
    n_refs: usize,
) -> Result<Progress<Vec<ReferenceSequence>>, FramingError> {
    let mut offset = 0;
    let mut refs = Vec::with_capacity(n_refs.min(1024));
    for _ in 0..n_refs {
        if buf.len() < offset + 4 {
            return Ok(Progress::Needs(offset + 4));
        }
        let l_name = read_len(&buf[offset..offset + 4])?;
        let total = offset + 4 + l_name + 4;
        if buf.len() < total {
            return Ok(Progress::Needs(total));
        }
        let name_bytes = &buf[offset + 4..offset + 4 + l_name];
        if l_name == 0 || name_bytes[l_name - 1] != 0 {
            return Err(FramingError::ReferenceNameNotNullTerminated);
        }
        let name = from_utf8(&name_bytes[..l_name - 1])
            .map_err(|_| FramingError::NotUtf8("reference name"))?;
        let len = LittleEndian::read_i32(&buf[offset + 4 + l_name..total]);
        refs.push(ReferenceSequence::new(name, len));
        offset = total;
    }
    Ok(Progress::Done(refs, offset))
}

/// Takes `count` bytes of an alignment block, keeping track of the offset.
fn take<'a>(
    block: &'a [u8],
    offset: &mut usize,
    count: usize,
) -> Result<&'a [u8], FramingError> {
    if block.len() < *offset + count {
        return Err(FramingError::Truncated {
            required: *offset + count,
            available: block.len(),
        });
    }
    let slice = &block[*offset..*offset + count];
    *offset += count;
    Ok(slice)
}

fn parse_alignment(buf: &[u8]) -> Result<Progress<RawAlignment>, FramingError> {
    if buf.len() < 4 {
        return Ok(Progress::Needs(4));
    }
    let block_size = read_len(&buf[0..4])?;
    let total = 4 + block_size;
    if buf.len() < total {
        return Ok(Progress::Needs(total));
    }
    let block = &buf[4..total];
    if block_size < 32 {
        return Err(FramingError::WrongInt32([buf[0], buf[1], buf[2], buf[3]]));
    }

    let ref_id = LittleEndian::read_i32(&block[0..4]);
    let pos = LittleEndian::read_i32(&block[4..8]);
    let l_read_name = block[8] as usize;
    let mapq = block[9];
    let bin = LittleEndian::read_u16(&block[10..12]);
    let n_cigar_op = LittleEndian::read_u16(&block[12..14]) as usize;
    let flag = LittleEndian::read_u16(&block[14..16]);
    let l_seq = read_len(&block[16..20])?;
    let mate_ref_id = LittleEndian::read_i32(&block[20..24]);
    let mate_pos = LittleEndian::read_i32(&block[24..28]);
    let template_len = LittleEndian::read_i32(&block[28..32]);

    let mut offset = 32;
    let name_bytes = take(block, &mut offset, l_read_name)?;
    if l_read_name == 0 || name_bytes[l_read_name - 1] != 0 {
        return Err(FramingError::ReadNameNotNullTerminated);
    }
    let name = name_bytes[..l_read_name - 1].to_vec();
    let cigar = take(block, &mut offset, 4 * n_cigar_op)?.to_vec();
    let seq_raw = take(block, &mut offset, (l_seq + 1) / 2)?.to_vec();
    let qual = take(block, &mut offset, l_seq)?.to_vec();
    let tags = block[offset..].to_vec();

    Ok(Progress::Done(
        RawAlignment {
            name,
            flag,
            ref_id,
            pos,
            mapq,
            bin,
            cigar,
            mate_ref_id,
            mate_pos,
            template_len,
            seq: Sequence::from_raw(seq_raw, l_seq),
            qual,
            tags,
        },
        total,
    ))
}

/// Incremental parser of an uncompressed BAM byte stream.
///
/// State machine `Header` -> `RefInfo(n_refs)` -> `Alignments`. The parser
/// holds a growable input buffer: on every poll it attempts to decode one
/// record from the front of the buffer, consumes it on success and leaves
/// the buffer untouched on short input.
pub struct Parser {
    buffer: Vec<u8>,
    start: usize,
    state: State,
    failed: bool,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            buffer: Vec::new(),
            start: 0,
            state: State::Header,
            failed: false,
        }
    }

    fn fail(&mut self, e: FramingError) -> Next<RawItem, FramingError> {
        self.failed = true;
        Next::Ready(Err(e))
    }

    /// Short input: wait for more bytes. When the producer is done, an empty
    /// buffer at a record boundary is a clean end, anything else is a
    /// truncated record.
    fn short(
        &mut self,
        required: usize,
        stopped: bool,
        boundary: bool,
    ) -> Next<RawItem, FramingError> {
        if !stopped {
            return Next::NotReady;
        }
        let available = self.buffer.len() - self.start;
        if available == 0 && boundary {
            Next::End
        } else {
            self.fail(FramingError::Truncated {
                required,
                available,
            })
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Transform for Parser {
    type Input = Vec<u8>;
    type Output = RawItem;
    type Error = FramingError;

    fn feed(&mut self, input: Vec<u8>) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(&input);
    }

    fn next(&mut self, stopped: bool) -> Next<RawItem, FramingError> {
        if self.failed {
            return Next::End;
        }
        match self.state {
            State::Header => match parse_header(&self.buffer[self.start..]) {
                Err(e) => self.fail(e),
                Ok(Progress::Needs(required)) => self.short(required, stopped, true),
                Ok(Progress::Done((text, n_refs), consumed)) => {
                    self.start += consumed;
                    debug!(
                        "Decoded BAM header: {} bytes of text, {} references",
                        text.len(),
                        n_refs
                    );
                    self.state = State::RefInfo(n_refs);
                    Next::Ready(Ok(RawItem::Header(text)))
                }
            },
            State::RefInfo(n_refs) => match parse_ref_info(&self.buffer[self.start..], n_refs) {
                Err(e) => self.fail(e),
                Ok(Progress::Needs(required)) => {
                    let buffered = self.buffer.len() - self.start;
                    if !stopped && buffered > REF_INFO_BUFFER_CAP {
                        return self.fail(FramingError::ReferenceInformationOverflow {
                            required,
                            buffered,
                        });
                    }
                    self.short(required, stopped, false)
                }
                Ok(Progress::Done(refs, consumed)) => {
                    self.start += consumed;
                    self.state = State::Alignments;
                    Next::Ready(Ok(RawItem::ReferenceInformation(refs)))
                }
            },
            State::Alignments => match parse_alignment(&self.buffer[self.start..]) {
                Err(e) => self.fail(e),
                Ok(Progress::Needs(required)) => self.short(required, stopped, true),
                Ok(Progress::Done(alignment, consumed)) => {
                    self.start += consumed;
                    Next::Ready(Ok(RawItem::Alignment(alignment)))
                }
            },
        }
    }
}

/// Encodes raw items back into uncompressed BAM bytes.
///
/// Items are expected in stream order (header, reference information, then
/// alignments), which the [downgrader](../expand/struct.Downgrader.html)
/// guarantees.
pub struct Encoder {
    queue: VecDeque<Vec<u8>>,
}

fn encode_header(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + text.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(text.len() as i32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

fn encode_ref_info(refs: &[ReferenceSequence]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    for reference in refs {
        out.extend_from_slice(&(reference.name.len() as i32 + 1).to_le_bytes());
        out.extend_from_slice(reference.name.as_bytes());
        out.push(0);
        out.extend_from_slice(&reference.len.to_le_bytes());
    }
    out
}

fn encode_alignment(aln: &RawAlignment) -> Vec<u8> {
    debug_assert!(aln.cigar.len() % 4 == 0, "CIGAR blob length must be a multiple of 4");
    let l_seq = aln.seq.len();
    let block_size =
        32 + aln.name.len() + 1 + aln.cigar.len() + aln.seq.raw().len() + l_seq + aln.tags.len();

    let mut out = Vec::with_capacity(4 + block_size);
    out.extend_from_slice(&(block_size as i32).to_le_bytes());
    out.extend_from_slice(&aln.ref_id.to_le_bytes());
    out.extend_from_slice(&aln.pos.to_le_bytes());
    out.push(aln.name.len() as u8 + 1);
    out.push(aln.mapq);
    out.extend_from_slice(&aln.bin.to_le_bytes());
    out.extend_from_slice(&((aln.cigar.len() / 4) as u16).to_le_bytes());
    out.extend_from_slice(&aln.flag.to_le_bytes());
    out.extend_from_slice(&(l_seq as i32).to_le_bytes());
    out.extend_from_slice(&aln.mate_ref_id.to_le_bytes());
    out.extend_from_slice(&aln.mate_pos.to_le_bytes());
    out.extend_from_slice(&aln.template_len.to_le_bytes());
    out.extend_from_slice(&aln.name);
    out.push(0);
    out.extend_from_slice(&aln.cigar);
    out.extend_from_slice(aln.seq.raw());
    if aln.qual.len() == l_seq {
        out.extend_from_slice(&aln.qual);
    } else {
        // Missing qualities are stored as 0xff for every base.
        out.extend(std::iter::repeat(0xff).take(l_seq));
    }
    out.extend_from_slice(&aln.tags);
    out
}

impl Encoder {
    pub fn new() -> Self {
        Encoder {
            queue: VecDeque::new(),
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new()
    }
}

impl Transform for Encoder {
    type Input = RawItem;
    type Output = Vec<u8>;
    type Error = Infallible;

    fn feed(&mut self, item: RawItem) {
        let chunk = match item {
            RawItem::Header(text) => encode_header(&text),
            RawItem::ReferenceInformation(refs) => encode_ref_info(&refs),
            RawItem::Alignment(aln) => encode_alignment(&aln),
        };
        self.queue.push_back(chunk);
    }

    fn next(&mut self, stopped: bool) -> Next<Vec<u8>, Infallible> {
        match self.queue.pop_front() {
            Some(chunk) => Next::Ready(Ok(chunk)),
            None if stopped => Next::End,
            None => Next::NotReady,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(parser: &mut Parser, stopped: bool) -> Vec<RawItem> {
        let mut items = Vec::new();
        while let Next::Ready(result) = parser.next(stopped) {
            items.push(result.unwrap());
        }
        items
    }

    /// A small valid stream: empty header text, one reference, one alignment.
    fn sample_stream() -> Vec<u8> {
        let mut stream = Vec::new();
        stream.extend_from_slice(&MAGIC);
        stream.extend_from_slice(&0_i32.to_le_bytes()); // l_text
        stream.extend_from_slice(&1_i32.to_le_bytes()); // n_ref
        stream.extend_from_slice(&5_i32.to_le_bytes()); // l_name
        stream.extend_from_slice(b"chr1\x00");
        stream.extend_from_slice(&1000_i32.to_le_bytes()); // l_ref

        let alignment = RawAlignment {
            name: b"read1".to_vec(),
            flag: 16,
            ref_id: 0,
            pos: 4,
            mapq: 50,
            bin: 4681,
            cigar: (4_u32 << 4).to_le_bytes().to_vec(),
            mate_ref_id: -1,
            mate_pos: -1,
            template_len: 0,
            seq: Sequence::from_text(b"ACGT".iter().cloned()).unwrap(),
            qual: vec![30, 30, 30, 30],
            tags: Vec::new(),
        };
        stream.extend(encode_alignment(&alignment));
        stream
    }

    #[test]
    fn parses_whole_stream() {
        let stream = sample_stream();
        let mut parser = Parser::new();
        parser.feed(stream);
        let items = drain(&mut parser, true);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], RawItem::Header(String::new()));
        assert_eq!(
            items[1],
            RawItem::ReferenceInformation(vec![ReferenceSequence::new("chr1", 1000)])
        );
        match &items[2] {
            RawItem::Alignment(aln) => {
                assert_eq!(aln.name, b"read1");
                assert_eq!(aln.pos, 4);
                assert_eq!(aln.seq.to_text(), "ACGT");
            }
            item => panic!("Expected an alignment, got {:?}", item),
        }
        assert_eq!(parser.next(true), Next::End);
    }

    #[test]
    fn single_byte_chunks_parse_identically() {
        let stream = sample_stream();
        let mut parser = Parser::new();
        let mut items = Vec::new();
        for &byte in &stream {
            parser.feed(vec![byte]);
            items.extend(drain(&mut parser, false));
        }
        items.extend(drain(&mut parser, true));
        assert_eq!(items.len(), 3);
        assert_eq!(parser.next(true), Next::End);
    }

    #[test]
    fn reencoding_is_byte_exact() {
        let stream = sample_stream();
        let mut parser = Parser::new();
        parser.feed(stream.clone());

        let mut encoder = Encoder::new();
        // The header chunk lacks n_ref until the reference information
        // arrives, so compare the concatenation.
        let mut reencoded = Vec::new();
        loop {
            match parser.next(true) {
                Next::Ready(result) => encoder.feed(result.unwrap()),
                Next::End => break,
                Next::NotReady => unreachable!(),
            }
        }
        loop {
            match encoder.next(true) {
                Next::Ready(result) => reencoded.extend(result.unwrap()),
                Next::End => break,
                Next::NotReady => unreachable!(),
            }
        }
        assert_eq!(reencoded, stream);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut parser = Parser::new();
        parser.feed(b"CRAM........".to_vec());
        assert_eq!(
            parser.next(false),
            Next::Ready(Err(FramingError::WrongMagicNumber(*b"CRAM")))
        );
        assert_eq!(parser.next(false), Next::End);
    }

    #[test]
    fn rejects_unterminated_read_name() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&MAGIC);
        stream.extend_from_slice(&0_i32.to_le_bytes());
        stream.extend_from_slice(&0_i32.to_le_bytes());
        // One alignment whose name region does not end with 0.
        let mut block = Vec::new();
        block.extend_from_slice(&(-1_i32).to_le_bytes()); // ref_id
        block.extend_from_slice(&(-1_i32).to_le_bytes()); // pos
        block.push(3); // l_read_name
        block.push(255); // mapq
        block.extend_from_slice(&[0; 2]); // bin
        block.extend_from_slice(&[0; 2]); // n_cigar_op
        block.extend_from_slice(&4_u16.to_le_bytes()); // flag
        block.extend_from_slice(&0_i32.to_le_bytes()); // l_seq
        block.extend_from_slice(&(-1_i32).to_le_bytes()); // mate ref_id
        block.extend_from_slice(&(-1_i32).to_le_bytes()); // mate pos
        block.extend_from_slice(&0_i32.to_le_bytes()); // tlen
        block.extend_from_slice(b"ab!");
        stream.extend_from_slice(&(block.len() as i32).to_le_bytes());
        stream.extend_from_slice(&block);

        let mut parser = Parser::new();
        parser.feed(stream);
        let _header = parser.next(false);
        let _refs = parser.next(false);
        assert_eq!(
            parser.next(false),
            Next::Ready(Err(FramingError::ReadNameNotNullTerminated))
        );
    }

    #[test]
    fn truncated_stream_fails() {
        let stream = sample_stream();
        let mut parser = Parser::new();
        parser.feed(stream[..stream.len() - 3].to_vec());
        let _header = parser.next(true);
        let _refs = parser.next(true);
        match parser.next(true) {
            Next::Ready(Err(FramingError::Truncated { .. })) => {}
            next => panic!("Expected a truncated-record error, got {:?}", next),
        }
    }
}
