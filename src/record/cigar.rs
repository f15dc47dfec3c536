//! CIGAR and operations on it.

use std::fmt::{self, Display, Formatter, Write};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Error produced while decoding a packed CIGAR.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CigarError {
    /// The packed blob length is not a multiple of four.
    #[error("CIGAR blob has length {0}, not a multiple of 4")]
    WrongLength(usize),
    /// A word carries an operation code above 8. Contains the whole word.
    #[error("CIGAR word {0:#x} has an invalid operation code")]
    WrongOperation(u32),
}

/// Alignment operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operation {
    AlnMatch = 0,
    Insertion = 1,
    Deletion = 2,
    Skip = 3,
    Soft = 4,
    Hard = 5,
    Padding = 6,
    SeqMatch = 7,
    SeqMismatch = 8,
}

impl Operation {
    /// Returns operation from a 4-bit code (0..=8).
    pub fn from_code(code: u32) -> Option<Operation> {
        use Operation::*;
        match code {
            0 => Some(AlnMatch),
            1 => Some(Insertion),
            2 => Some(Deletion),
            3 => Some(Skip),
            4 => Some(Soft),
            5 => Some(Hard),
            6 => Some(Padding),
            7 => Some(SeqMatch),
            8 => Some(SeqMismatch),
            _ => None,
        }
    }

    /// Text symbol of the operation (`MIDNSHP=X`).
    pub fn symbol(self) -> char {
        b"MIDNSHP=X"[self as usize] as char
    }

    /// Returns `true` if the operation consumes the query sequence (M, I, S, =, X).
    pub fn consumes_query(self) -> bool {
        use Operation::*;
        match self {
            AlnMatch | Insertion | Soft | SeqMatch | SeqMismatch => true,
            _ => false,
        }
    }

    /// Returns `true` if the operation consumes the reference (M, D, N, =, X).
    pub fn consumes_ref(self) -> bool {
        use Operation::*;
        match self {
            AlnMatch | Deletion | Skip | SeqMatch | SeqMismatch => true,
            _ => false,
        }
    }
}

/// A CIGAR: a sequence of `(length, operation)` pairs stored as packed
/// 32-bit words (`length << 4 | operation`).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Cigar(Vec<u32>);

impl Cigar {
    /// Creates an empty CIGAR.
    pub fn new() -> Self {
        Cigar(Vec::new())
    }

    /// Decodes a CIGAR from its wire blob of little-endian 32-bit words.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, CigarError> {
        if blob.len() % 4 != 0 {
            return Err(CigarError::WrongLength(blob.len()));
        }
        let mut raw = Vec::with_capacity(blob.len() / 4);
        for chunk in blob.chunks(4) {
            let word = LittleEndian::read_u32(chunk);
            if Operation::from_code(word & 0xf).is_none() {
                return Err(CigarError::WrongOperation(word));
            }
            raw.push(word);
        }
        Ok(Cigar(raw))
    }

    /// Creates a CIGAR from `(length, operation)` pairs.
    pub fn from_ops<I: IntoIterator<Item = (u32, Operation)>>(ops: I) -> Self {
        Cigar(
            ops.into_iter()
                .map(|(len, op)| len << 4 | op as u32)
                .collect(),
        )
    }

    /// Appends the wire blob of the CIGAR to `out`.
    pub fn to_bytes(&self, out: &mut Vec<u8>) {
        for &word in &self.0 {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the pair `(length, operation)` at `index`.
    pub fn at(&self, index: usize) -> (u32, Operation) {
        let word = self.0[index];
        let op = Operation::from_code(word & 0xf).expect("CIGAR holds an invalid operation");
        (word >> 4, op)
    }

    /// Iterator over `(length, operation)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Operation)> + '_ {
        (0..self.0.len()).map(move |i| self.at(i))
    }

    /// Raw packed words.
    pub fn raw(&self) -> &[u32] {
        &self.0
    }
}

impl Display for Cigar {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_char('*');
        }
        for (len, op) in self.iter() {
            write!(f, "{}{}", len, op.symbol())?;
        }
        Ok(())
    }
}
