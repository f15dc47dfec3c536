//! Gzip stream inflater.

use byteorder::{ByteOrder, LittleEndian};
use flate2::{Decompress, FlushDecompress, Status};

use super::{
    as_u16, UnzipError, FLAG_FCOMMENT, FLAG_FEXTRA, FLAG_FHCRC, FLAG_FNAME, GZIP_CM_DEFLATE,
    GZIP_ID1, GZIP_ID2, MAX_BLOCK_SIZE,
};
use crate::transform::{Next, Transform};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Body,
    Footer,
}

/// Returns the total header size of the member starting at `buf`, or `None`
/// if the buffer does not hold the whole header yet.
fn header_size(buf: &[u8]) -> Result<Option<usize>, UnzipError> {
    if buf.len() < 10 {
        return Ok(None);
    }
    if buf[0] != GZIP_ID1 || buf[1] != GZIP_ID2 {
        return Err(UnzipError::Corrupted(format!(
            "invalid magic bytes [{}, {}]",
            buf[0], buf[1]
        )));
    }
    if buf[2] != GZIP_CM_DEFLATE {
        return Err(UnzipError::Corrupted(format!(
            "unsupported compression method {}",
            buf[2]
        )));
    }
    let flags = buf[3];
    let mut size = 10;
    if flags & FLAG_FEXTRA != 0 {
        if buf.len() < size + 2 {
            return Ok(None);
        }
        size += 2 + as_u16(buf, size) as usize;
        if buf.len() < size {
            return Ok(None);
        }
    }
    for name_flag in &[FLAG_FNAME, FLAG_FCOMMENT] {
        if flags & name_flag != 0 {
            match buf[size..].iter().position(|&b| b == 0) {
                Some(i) => size += i + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FLAG_FHCRC != 0 {
        size += 2;
    }
    if buf.len() < size {
        Ok(None)
    } else {
        Ok(Some(size))
    }
}

/// Transform that inflates a stream of gzip members into byte chunks.
///
/// The transform accepts compressed chunks of arbitrary sizes and emits
/// inflated chunks of arbitrary sizes (at most
/// [chunk_size](#method.with_chunk_size) bytes each). Member boundaries are
/// invisible to the consumer, so both plain gzip files and BGZF series
/// decode transparently. CRC32 and uncompressed size of every member are
/// verified against the footer.
///
/// A clean end of input at a member boundary terminates the output stream;
/// anything else fails with [UnzipError](../enum.UnzipError.html) exactly
/// once.
pub struct Inflate {
    buffer: Vec<u8>,
    start: usize,
    state: State,
    inflater: Decompress,
    hasher: crc32fast::Hasher,
    member_size: u32,
    chunk_size: usize,
    failed: bool,
}

impl Inflate {
    /// Creates an inflater with the default output chunk size (65536).
    pub fn new() -> Self {
        Self::with_chunk_size(MAX_BLOCK_SIZE)
    }

    /// Creates an inflater that emits chunks of at most `chunk_size` bytes.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "Output chunk size must be positive");
        Inflate {
            buffer: Vec::new(),
            start: 0,
            state: State::Header,
            inflater: Decompress::new(false),
            hasher: crc32fast::Hasher::new(),
            member_size: 0,
            chunk_size,
            failed: false,
        }
    }

    fn fail(&mut self, e: UnzipError) -> Next<Vec<u8>, UnzipError> {
        self.failed = true;
        Next::Ready(Err(e))
    }

    /// Out of buffered input: wait for more, unless the producer is done.
    fn starve(&mut self, stopped: bool) -> Next<Vec<u8>, UnzipError> {
        if stopped {
            self.fail(UnzipError::UnexpectedEnd)
        } else {
            Next::NotReady
        }
    }
}

impl Transform for Inflate {
    type Input = Vec<u8>;
    type Output = Vec<u8>;
    type Error = UnzipError;

    fn feed(&mut self, input: Vec<u8>) {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(&input);
    }

    fn next(&mut self, stopped: bool) -> Next<Vec<u8>, UnzipError> {
        if self.failed {
            return Next::End;
        }
        loop {
            match self.state {
                State::Header => {
                    let buf = &self.buffer[self.start..];
                    if buf.is_empty() && stopped {
                        return Next::End;
                    }
                    match header_size(buf) {
                        Err(e) => return self.fail(e),
                        Ok(None) => return self.starve(stopped),
                        Ok(Some(size)) => {
                            self.start += size;
                            self.inflater.reset(false);
                            self.hasher = crc32fast::Hasher::new();
                            self.member_size = 0;
                            self.state = State::Body;
                        }
                    }
                }
                State::Body => {
                    if self.start == self.buffer.len() {
                        return self.starve(stopped);
                    }
                    let mut output = vec![0_u8; self.chunk_size];
                    let in_before = self.inflater.total_in();
                    let out_before = self.inflater.total_out();
                    let status = match self.inflater.decompress(
                        &self.buffer[self.start..],
                        &mut output,
                        FlushDecompress::None,
                    ) {
                        Ok(status) => status,
                        Err(e) => return self.fail(UnzipError::Corrupted(e.to_string())),
                    };
                    let consumed = (self.inflater.total_in() - in_before) as usize;
                    let produced = (self.inflater.total_out() - out_before) as usize;
                    self.start += consumed;
                    output.truncate(produced);
                    if status == Status::StreamEnd {
                        self.state = State::Footer;
                    }
                    if produced > 0 {
                        self.hasher.update(&output);
                        self.member_size = self.member_size.wrapping_add(produced as u32);
                        return Next::Ready(Ok(output));
                    }
                    if status != Status::StreamEnd && consumed == 0 {
                        // No progress without more input.
                        return self.starve(stopped);
                    }
                }
                State::Footer => {
                    let buf = &self.buffer[self.start..];
                    if buf.len() < 8 {
                        return self.starve(stopped);
                    }
                    let expected_crc = LittleEndian::read_u32(&buf[0..4]);
                    let expected_size = LittleEndian::read_u32(&buf[4..8]);
                    let observed_crc = self.hasher.clone().finalize();
                    if expected_crc != observed_crc {
                        return self.fail(UnzipError::Corrupted(format!(
                            "CRC32 mismatch: expected {}, observed {}",
                            expected_crc, observed_crc
                        )));
                    }
                    if expected_size != self.member_size {
                        return self.fail(UnzipError::Corrupted(format!(
                            "uncompressed sizes do not match: expected {}, observed {}",
                            expected_size, self.member_size
                        )));
                    }
                    self.start += 8;
                    self.state = State::Header;
                }
            }
        }
    }
}
