//! Streaming gzip member codec.
//!
//! BAM files are wrapped in BGZF, which is a plain series of gzip members, so
//! a member-aware gzip codec is all the decoder needs. The
//! [Inflate](read/struct.Inflate.html) transform accepts compressed byte
//! chunks and emits inflated byte chunks; the
//! [Deflate](write/struct.Deflate.html) transform performs the inverse,
//! producing BGZF-shaped members so the output is valid both as gzip and as
//! BGZF.

use thiserror::Error;

pub mod read;
pub mod write;

pub use read::Inflate;
pub use write::Deflate;

/// Error produced while decompressing a gzip stream.
///
/// # Variants
///
/// * `Corrupted(s)` - a member has an invalid header, footer or contents.
/// `s` contains additional information about the problem.
/// * `UnexpectedEnd` - the stream ended in the middle of a member.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum UnzipError {
    #[error("corrupted gzip member: {0}")]
    Corrupted(String),
    #[error("unexpected end of stream inside a gzip member")]
    UnexpectedEnd,
}

pub(crate) const GZIP_ID1: u8 = 31;
pub(crate) const GZIP_ID2: u8 = 139;
pub(crate) const GZIP_CM_DEFLATE: u8 = 8;

pub(crate) const FLAG_FHCRC: u8 = 0x02;
pub(crate) const FLAG_FEXTRA: u8 = 0x04;
pub(crate) const FLAG_FNAME: u8 = 0x08;
pub(crate) const FLAG_FCOMMENT: u8 = 0x10;

/// Biggest possible size of a BGZF member, compressed or uncompressed (`= 65536`).
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Default uncompressed contents per emitted member. Kept below
/// [MAX_BLOCK_SIZE](constant.MAX_BLOCK_SIZE.html) so that even incompressible
/// contents fit the 16-bit BSIZE field after the member overhead is added.
pub const DEFAULT_CONTENTS_SIZE: usize = 0xff00;

pub(crate) fn as_u16(buffer: &[u8], start: usize) -> u16 {
    buffer[start] as u16 + ((buffer[start + 1] as u16) << 8)
}
