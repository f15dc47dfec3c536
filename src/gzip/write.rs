//! Gzip stream deflater.

use std::convert::Infallible;
use std::io::Write;
use std::mem;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{DEFAULT_CONTENTS_SIZE, GZIP_CM_DEFLATE, GZIP_ID1, GZIP_ID2, MAX_BLOCK_SIZE};
use crate::transform::{Next, Transform};

/// Compresses `contents` into a single complete gzip member.
///
/// The member carries the `BC` extra subfield with the total block size, so a
/// series of such members is a valid BGZF stream as well as a valid gzip
/// file. Compressing empty contents produces the 28-byte terminal member.
fn compress_member(contents: &[u8], compression: Compression) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), compression);
    encoder
        .write_all(contents)
        .expect("Failed to deflate contents to a vector");
    let payload = encoder
        .finish()
        .expect("Failed to deflate contents to a vector");

    // 18-byte header + payload + 8-byte footer.
    let block_size = 18 + payload.len() + 8;
    assert!(
        block_size <= MAX_BLOCK_SIZE,
        "Compressed member size {} exceeds {}",
        block_size,
        MAX_BLOCK_SIZE
    );
    let bsize = (block_size - 1) as u16;

    let mut member = Vec::with_capacity(block_size);
    member.extend_from_slice(&[
        GZIP_ID1,
        GZIP_ID2,
        GZIP_CM_DEFLATE,
        4, // Flags (FEXTRA)
        0,
        0,
        0,
        0, // Modification time
        0,
        255, // Extra flags, OS (255 = unknown)
        6,
        0, // Extra length (2 bytes)
        66,
        67, // "BC" subfield
        2,
        0, // Subfield length (2 bytes)
        bsize as u8,
        (bsize >> 8) as u8,
    ]);
    member.extend_from_slice(&payload);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    member.extend_from_slice(&hasher.finalize().to_le_bytes());
    member.extend_from_slice(&(contents.len() as u32).to_le_bytes());
    member
}

/// Transform that compresses a byte stream into a series of gzip members.
///
/// Input chunks are accumulated until [contents_size](#method.contents_size)
/// bytes are available, then compressed into one member. Once the input
/// stream stops, the remaining contents are flushed and a terminal empty
/// member is appended, the marker BGZF consumers use to detect truncation.
pub struct Deflate {
    contents: Vec<u8>,
    compression: Compression,
    contents_size: usize,
    terminated: bool,
}

impl Deflate {
    /// Creates a deflater with compression level 6 and the default member
    /// contents size.
    pub fn new() -> Self {
        Self::with_compression(Compression::new(6))
    }

    /// Creates a deflater with the given compression level.
    pub fn with_compression(compression: Compression) -> Self {
        Deflate {
            contents: Vec::new(),
            compression,
            contents_size: DEFAULT_CONTENTS_SIZE,
            terminated: false,
        }
    }

    /// Sets the uncompressed contents size per emitted member.
    /// Panics if `size` is zero or exceeds the BGZF-safe maximum.
    pub fn contents_size(mut self, size: usize) -> Self {
        assert!(
            size > 0 && size <= DEFAULT_CONTENTS_SIZE,
            "Member contents size must be in 1..={}",
            DEFAULT_CONTENTS_SIZE
        );
        self.contents_size = size;
        self
    }
}

impl Transform for Deflate {
    type Input = Vec<u8>;
    type Output = Vec<u8>;
    type Error = Infallible;

    fn feed(&mut self, input: Vec<u8>) {
        self.contents.extend_from_slice(&input);
    }

    fn next(&mut self, stopped: bool) -> Next<Vec<u8>, Infallible> {
        if self.contents.len() >= self.contents_size {
            let rest = self.contents.split_off(self.contents_size);
            let full = mem::replace(&mut self.contents, rest);
            return Next::Ready(Ok(compress_member(&full, self.compression)));
        }
        if !stopped {
            return Next::NotReady;
        }
        if !self.contents.is_empty() {
            let contents = mem::replace(&mut self.contents, Vec::new());
            return Next::Ready(Ok(compress_member(&contents, self.compression)));
        }
        if !self.terminated {
            self.terminated = true;
            return Next::Ready(Ok(compress_member(&[], self.compression)));
        }
        Next::End
    }
}
