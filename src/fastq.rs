//! FASTQ codec: four-line records over a line-tagged stream.
//!
//! The [Parser](struct.Parser.html) transform consumes lines (newline
//! already stripped by the line-splitting collaborator) in groups of four
//! and emits [FastqRecord](struct.FastqRecord.html)s; the
//! [Emitter](struct.Emitter.html) writes them back as
//! `@name\nseq\n+comment\nqual\n`. [FastqReader](struct.FastqReader.html)
//! and [FastqWriter](struct.FastqWriter.html) wrap the transforms around
//! buffered streams.
//!
//! The [illumina](illumina/index.html) module parses Casava 1.8+ read names.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::transform::{Next, Transform};
use crate::ItemWriter;

/// Error produced while parsing FASTQ text.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FastqError {
    /// A record's first line does not start with `@`.
    #[error("line {line}: record does not start with '@'")]
    MissingAt { line: usize },
    /// A record's third line does not start with `+`.
    #[error("line {line}: separator does not start with '+'")]
    MissingPlus { line: usize },
    /// Sequence and qualities have different lengths.
    #[error("line {line}: sequence length {sequence} does not match qualities length {qualities}")]
    LengthMismatch {
        line: usize,
        sequence: usize,
        qualities: usize,
    },
    /// The stream stopped in the middle of a four-line record.
    #[error("stream ended in the middle of a record (line {line})")]
    Truncated { line: usize },
    /// A read name does not follow the expected naming scheme.
    #[error("cannot parse read name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

/// A single FASTQ record. `name` is the text after `@` and `comment` the
/// text after `+`; internal whitespace is preserved exactly.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FastqRecord {
    pub name: String,
    pub sequence: String,
    pub comment: String,
    pub qualities: String,
}

/// Splits a read name at the first whitespace run.
///
/// Returns `(id, None)` when the name holds no whitespace, and
/// `(id, Some(rest))` otherwise, with `rest` starting after the whitespace.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.find(char::is_whitespace) {
        None => (name, None),
        Some(i) => {
            let rest = name[i..].trim_start();
            if rest.is_empty() {
                (&name[..i], None)
            } else {
                (&name[..i], Some(rest))
            }
        }
    }
}

/// Checks a quality line against the sequence it belongs to.
pub fn qualities_of_line(
    sequence: &str,
    qualities: &str,
    line: usize,
) -> Result<(), FastqError> {
    if sequence.len() != qualities.len() {
        Err(FastqError::LengthMismatch {
            line,
            sequence: sequence.len(),
            qualities: qualities.len(),
        })
    } else {
        Ok(())
    }
}

#[derive(Default)]
struct PartialRecord {
    name: Option<String>,
    sequence: Option<String>,
    comment: Option<String>,
}

/// Transform that assembles four-line FASTQ records from a line stream.
pub struct Parser {
    lines: VecDeque<String>,
    partial: PartialRecord,
    line_number: usize,
    failed: bool,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            lines: VecDeque::new(),
            partial: PartialRecord::default(),
            line_number: 0,
            failed: false,
        }
    }

    fn fail(&mut self, e: FastqError) -> Next<FastqRecord, FastqError> {
        self.failed = true;
        Next::Ready(Err(e))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Transform for Parser {
    type Input = String;
    type Output = FastqRecord;
    type Error = FastqError;

    fn feed(&mut self, line: String) {
        self.lines.push_back(line);
    }

    fn next(&mut self, stopped: bool) -> Next<FastqRecord, FastqError> {
        if self.failed {
            return Next::End;
        }
        loop {
            let line = match self.lines.pop_front() {
                Some(line) => line,
                None => {
                    if !stopped {
                        return Next::NotReady;
                    }
                    if self.partial.name.is_some() {
                        let line = self.line_number;
                        return self.fail(FastqError::Truncated { line });
                    }
                    return Next::End;
                }
            };
            self.line_number += 1;
            let number = self.line_number;

            if self.partial.name.is_none() {
                if !line.starts_with('@') {
                    return self.fail(FastqError::MissingAt { line: number });
                }
                self.partial.name = Some(line[1..].to_string());
            } else if self.partial.sequence.is_none() {
                self.partial.sequence = Some(line);
            } else if self.partial.comment.is_none() {
                if !line.starts_with('+') {
                    return self.fail(FastqError::MissingPlus { line: number });
                }
                self.partial.comment = Some(line[1..].to_string());
            } else {
                let partial = std::mem::take(&mut self.partial);
                let record = FastqRecord {
                    name: partial.name.expect("Record name should be defined"),
                    sequence: partial.sequence.expect("Record sequence should be defined"),
                    comment: partial.comment.expect("Record comment should be defined"),
                    qualities: line,
                };
                if let Err(e) = qualities_of_line(&record.sequence, &record.qualities, number) {
                    return self.fail(e);
                }
                return Next::Ready(Ok(record));
            }
        }
    }
}

/// Transform that formats FASTQ records back into text blocks, one
/// `@name\nseq\n+comment\nqual\n` block per record.
pub struct Emitter {
    queue: VecDeque<FastqRecord>,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter {
            queue: VecDeque::new(),
        }
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Emitter::new()
    }
}

impl Transform for Emitter {
    type Input = FastqRecord;
    type Output = String;
    type Error = Infallible;

    fn feed(&mut self, record: FastqRecord) {
        self.queue.push_back(record);
    }

    fn next(&mut self, stopped: bool) -> Next<String, Infallible> {
        match self.queue.pop_front() {
            Some(record) => Next::Ready(Ok(format!(
                "@{}\n{}\n+{}\n{}\n",
                record.name, record.sequence, record.comment, record.qualities
            ))),
            None if stopped => Next::End,
            None => Next::NotReady,
        }
    }
}

/// Error of the buffered FASTQ reader: either the stream failed or the text
/// did not parse.
#[derive(Debug, Error)]
pub enum FastqReadError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Fastq(#[from] FastqError),
}

/// Reads FASTQ records consecutively from a buffered stream.
///
/// ```rust,no_run
/// let reader = bamcodec::FastqReader::from_path("in.fastq").unwrap();
/// for record in reader {
///     let record = record.unwrap();
///     // Do something with the record.
/// }
/// ```
pub struct FastqReader<R: BufRead> {
    stream: R,
    parser: Parser,
    stopped: bool,
    done: bool,
}

impl FastqReader<BufReader<File>> {
    /// Opens a FASTQ reader from `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(FastqReader::from_stream(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> FastqReader<R> {
    /// Opens a FASTQ reader from a buffered stream.
    pub fn from_stream(stream: R) -> Self {
        FastqReader {
            stream,
            parser: Parser::new(),
            stopped: false,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<FastqRecord, FastqReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.parser.next(self.stopped) {
                Next::Ready(Ok(record)) => return Some(Ok(record)),
                Next::Ready(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                Next::End => {
                    self.done = true;
                    return None;
                }
                Next::NotReady => {
                    let mut line = String::new();
                    match self.stream.read_line(&mut line) {
                        Ok(0) => self.stopped = true,
                        Ok(_) => {
                            if line.ends_with('\n') {
                                line.pop();
                                if line.ends_with('\r') {
                                    line.pop();
                                }
                            }
                            self.parser.feed(line);
                        }
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

/// Writes FASTQ records consecutively to a stream.
pub struct FastqWriter<W: Write> {
    stream: W,
    emitter: Emitter,
}

impl FastqWriter<BufWriter<File>> {
    /// Creates a FASTQ writer to `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(FastqWriter::from_stream(BufWriter::new(File::create(
            path,
        )?)))
    }
}

impl<W: Write> FastqWriter<W> {
    /// Creates a FASTQ writer to a stream. Preferably the stream should be
    /// wrapped in a buffer writer, such as `BufWriter`.
    pub fn from_stream(stream: W) -> Self {
        FastqWriter {
            stream,
            emitter: Emitter::new(),
        }
    }
}

impl<W: Write> ItemWriter<FastqRecord> for FastqWriter<W> {
    type Error = io::Error;

    fn write(&mut self, record: FastqRecord) -> io::Result<()> {
        self.emitter.feed(record);
        while let Next::Ready(result) = self.emitter.next(false) {
            let block = match result {
                Ok(block) => block,
                Err(e) => match e {},
            };
            self.stream.write_all(block.as_bytes())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

pub mod illumina {
    //! Casava 1.8+ read names.
    //!
    //! A name such as
    //! `EAS139:136:FC706VJ:2:2104:15343:197393 1:Y:18:ATCACG` carries eleven
    //! colon/space separated fields; the tile number additionally packs
    //! surface, swath and tile into four digits.

    use super::{split_name, FastqError};
    use std::fmt;

    /// Flowcell surface of a tile.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Surface {
        Top,
        Bottom,
    }

    /// A flowcell tile: `S W TT` packed into four digits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Tile {
        pub surface: Surface,
        /// Swath within the surface, 1..=3.
        pub swath: u8,
        /// Tile number within the swath, 1..=99.
        pub number: u8,
    }

    fn bad_name(name: &str, reason: &str) -> FastqError {
        FastqError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    impl Tile {
        /// Decodes the four-digit tile representation, such as `2304`.
        pub fn from_text(text: &str) -> Result<Tile, FastqError> {
            let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
            if digits.len() != 4 || text.chars().count() != 4 {
                return Err(bad_name(text, "tile is not a four-digit number"));
            }
            let surface = match digits[0] {
                1 => Surface::Top,
                2 => Surface::Bottom,
                _ => return Err(bad_name(text, "tile surface must be 1 or 2")),
            };
            let swath = digits[1] as u8;
            if !(1..=3).contains(&swath) {
                return Err(bad_name(text, "tile swath must be in 1..=3"));
            }
            let number = (digits[2] * 10 + digits[3]) as u8;
            if number == 0 {
                return Err(bad_name(text, "tile number must be in 1..=99"));
            }
            Ok(Tile {
                surface,
                swath,
                number,
            })
        }
    }

    impl fmt::Display for Tile {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            let surface = match self.surface {
                Surface::Top => 1,
                Surface::Bottom => 2,
            };
            write!(f, "{}{}{:02}", surface, self.swath, self.number)
        }
    }

    /// A fully parsed Casava 1.8+ read name.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SequenceId {
        pub instrument: String,
        pub run_number: u32,
        pub flowcell_id: String,
        pub lane: u32,
        pub tile: Tile,
        pub x_pos: u32,
        pub y_pos: u32,
        pub read: u32,
        pub is_filtered: bool,
        pub control_number: u32,
        pub index: String,
    }

    fn parse_int(name: &str, field: &str, value: &str) -> Result<u32, FastqError> {
        value
            .parse()
            .map_err(|_| bad_name(name, &format!("{} '{}' is not a number", field, value)))
    }

    impl SequenceId {
        /// Parses a read name such as
        /// `EAS139:136:FC706VJ:2:2104:15343:197393 1:Y:18:ATCACG`.
        pub fn parse(name: &str) -> Result<SequenceId, FastqError> {
            let (location, description) = split_name(name);
            let description =
                description.ok_or_else(|| bad_name(name, "missing the description part"))?;

            let location: Vec<&str> = location.split(':').collect();
            if location.len() != 7 {
                return Err(bad_name(name, "expected 7 colon-separated location fields"));
            }
            let description: Vec<&str> = description.split(':').collect();
            if description.len() != 4 {
                return Err(bad_name(
                    name,
                    "expected 4 colon-separated description fields",
                ));
            }

            let is_filtered = match description[1] {
                "Y" => true,
                "N" => false,
                other => {
                    return Err(bad_name(
                        name,
                        &format!("filter field must be Y or N, got '{}'", other),
                    ))
                }
            };

            Ok(SequenceId {
                instrument: location[0].to_string(),
                run_number: parse_int(name, "run number", location[1])?,
                flowcell_id: location[2].to_string(),
                lane: parse_int(name, "lane", location[3])?,
                tile: Tile::from_text(location[4])?,
                x_pos: parse_int(name, "x position", location[5])?,
                y_pos: parse_int(name, "y position", location[6])?,
                read: parse_int(name, "read number", description[0])?,
                is_filtered,
                control_number: parse_int(name, "control number", description[2])?,
                index: description[3].to_string(),
            })
        }
    }

    impl fmt::Display for SequenceId {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}:{}:{}:{} {}:{}:{}:{}",
                self.instrument,
                self.run_number,
                self.flowcell_id,
                self.lane,
                self.tile,
                self.x_pos,
                self.y_pos,
                self.read,
                if self.is_filtered { "Y" } else { "N" },
                self.control_number,
                self.index
            )
        }
    }
}
