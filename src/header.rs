//! SAM header text codec.
//!
//! The header is an ordered sequence of typed lines. `@HD` and `@SQ` lines
//! are parsed into their known fields, other tag groups (`@RG`, `@PG`, ...)
//! keep their tag list verbatim, and `@CO` lines carry free text.

use thiserror::Error;

/// A two-letter name: the type of a header line or the name of a tag in it.
pub type TagName = [u8; 2];

/// Error produced while parsing SAM header text.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum HeaderError {
    /// An `@HD` line appears somewhere other than the first line.
    #[error("header line @HD is not the first line (line {0})")]
    HeaderLineNotFirst(usize),
    /// Any other malformed line. Contains the 1-based line number.
    #[error("invalid header line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
}

/// A single `tag:value` pair in a header line.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    name: TagName,
    value: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(name: &TagName, value: String) -> Tag {
        Tag { name: *name, value }
    }

    pub fn name(&self) -> &TagName {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    fn write(&self, out: &mut String) {
        out.push(self.name[0] as char);
        out.push(self.name[1] as char);
        out.push(':');
        out.push_str(&self.value);
    }
}

/// Sort order declared by the `SO` tag of the `@HD` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Unknown,
    Unsorted,
    QueryName,
    Coordinate,
}

impl SortOrder {
    /// Parses an `SO` tag value. Anything unrecognized maps to `Unknown`.
    pub fn from_text(text: &str) -> SortOrder {
        match text {
            "unsorted" => SortOrder::Unsorted,
            "queryname" => SortOrder::QueryName,
            "coordinate" => SortOrder::Coordinate,
            _ => SortOrder::Unknown,
        }
    }

    pub fn to_text(self) -> &'static str {
        match self {
            SortOrder::Unknown => "unknown",
            SortOrder::Unsorted => "unsorted",
            SortOrder::QueryName => "queryname",
            SortOrder::Coordinate => "coordinate",
        }
    }
}

/// A single entry of the reference dictionary: reference name and length.
///
/// The dictionary itself is an ordered `Vec<ReferenceSequence>`, indexed by
/// the same integer ids raw alignments use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceSequence {
    pub name: String,
    pub len: i32,
}

impl ReferenceSequence {
    pub fn new<S: Into<String>>(name: S, len: i32) -> Self {
        ReferenceSequence {
            name: name.into(),
            len,
        }
    }
}

/// A single typed header line.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderLine {
    /// The `@HD` line.
    Head {
        version: String,
        sort_order: SortOrder,
        extra: Vec<Tag>,
    },
    /// An `@SQ` line with its mandatory `SN` and `LN` tags parsed out.
    RefSequence {
        name: String,
        len: i32,
        extra: Vec<Tag>,
    },
    /// Any other tag group line, such as `@RG` or `@PG`, kept verbatim.
    Group { name: TagName, tags: Vec<Tag> },
    /// An `@CO` line.
    Comment(String),
}

fn invalid<T>(line: usize, reason: &str) -> Result<T, HeaderError> {
    Err(HeaderError::InvalidLine {
        line,
        reason: reason.to_string(),
    })
}

/// Removes the tag with `name` from `tags` and returns its value.
fn take_tag(tags: &mut Vec<Tag>, name: &TagName) -> Option<String> {
    let index = tags.iter().position(|tag| &tag.name == name)?;
    Some(tags.remove(index).value)
}

fn parse_line(text: &str, number: usize) -> Result<HeaderLine, HeaderError> {
    let mut split = text.split('\t');
    let group = split.next().expect("Split always yields at least one part");
    let group_bytes = group.as_bytes();
    if group_bytes.len() != 3 || group_bytes[0] != b'@' {
        return invalid(number, &format!("invalid line type '{}'", group));
    }
    let group_name = [group_bytes[1], group_bytes[2]];

    if &group_name == b"CO" {
        // Everything after the first tabulation, verbatim.
        return Ok(HeaderLine::Comment(
            text.splitn(2, '\t').nth(1).unwrap_or("").to_string(),
        ));
    }

    let mut tags = Vec::new();
    for part in split {
        let bytes = part.as_bytes();
        if bytes.len() < 3 || bytes[2] != b':' {
            return invalid(number, &format!("invalid tag '{}'", part));
        }
        tags.push(Tag::new(&[bytes[0], bytes[1]], part[3..].to_string()));
    }

    match &group_name {
        b"HD" => {
            let version = match take_tag(&mut tags, b"VN") {
                Some(version) => version,
                None => return invalid(number, "@HD line does not have a VN tag"),
            };
            let sort_order = take_tag(&mut tags, b"SO")
                .map(|so| SortOrder::from_text(&so))
                .unwrap_or(SortOrder::Unknown);
            Ok(HeaderLine::Head {
                version,
                sort_order,
                extra: tags,
            })
        }
        b"SQ" => {
            let name = match take_tag(&mut tags, b"SN") {
                Some(name) => name,
                None => return invalid(number, "@SQ line does not have a SN tag"),
            };
            let len = match take_tag(&mut tags, b"LN").map(|ln| ln.parse::<i32>()) {
                Some(Ok(len)) if len > 0 => len,
                Some(_) => return invalid(number, "@SQ line has a non-positive LN tag"),
                None => return invalid(number, "@SQ line does not have a LN tag"),
            };
            Ok(HeaderLine::RefSequence {
                name,
                len,
                extra: tags,
            })
        }
        _ => Ok(HeaderLine::Group {
            name: group_name,
            tags,
        }),
    }
}

/// Parses whole header text into typed lines. Empty lines are ignored. An
/// `@HD` line anywhere but the very first parsed line is rejected.
pub fn parse(text: &str) -> Result<Vec<HeaderLine>, HeaderError> {
    let mut lines = Vec::new();
    for (index, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let parsed = parse_line(line, index + 1)?;
        if let HeaderLine::Head { .. } = parsed {
            if !lines.is_empty() {
                return Err(HeaderError::HeaderLineNotFirst(index + 1));
            }
        }
        lines.push(parsed);
    }
    Ok(lines)
}

/// Appends the text form of one header line (without the line feed) to `out`.
pub fn write_line(line: &HeaderLine, out: &mut String) {
    match line {
        HeaderLine::Head {
            version,
            sort_order,
            extra,
        } => {
            out.push_str("@HD\tVN:");
            out.push_str(version);
            out.push_str("\tSO:");
            out.push_str(sort_order.to_text());
            for tag in extra {
                out.push('\t');
                tag.write(out);
            }
        }
        HeaderLine::RefSequence { name, len, extra } => {
            out.push_str("@SQ\tSN:");
            out.push_str(name);
            out.push_str("\tLN:");
            out.push_str(&len.to_string());
            for tag in extra {
                out.push('\t');
                tag.write(out);
            }
        }
        HeaderLine::Group { name, tags } => {
            out.push('@');
            out.push(name[0] as char);
            out.push(name[1] as char);
            for tag in tags {
                out.push('\t');
                tag.write(out);
            }
        }
        HeaderLine::Comment(text) => {
            out.push_str("@CO\t");
            out.push_str(text);
        }
    }
}

/// The text form of a whole header, one line feed after every line.
pub fn to_text(lines: &[HeaderLine]) -> String {
    let mut out = String::new();
    for line in lines {
        write_line(line, &mut out);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_lines() {
        let text = "@HD\tVN:1.6\tSO:coordinate\n\
                    @SQ\tSN:chr1\tLN:248956422\tM5:abcdef\n\
                    @RG\tID:rg1\tSM:sample\n\
                    @CO\tfree text\twith a tabulation\n";
        let lines = parse(text).unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            HeaderLine::Head {
                version: "1.6".to_string(),
                sort_order: SortOrder::Coordinate,
                extra: vec![],
            }
        );
        match &lines[1] {
            HeaderLine::RefSequence { name, len, extra } => {
                assert_eq!(name, "chr1");
                assert_eq!(*len, 248956422);
                assert_eq!(extra, &[Tag::new(b"M5", "abcdef".to_string())]);
            }
            line => panic!("Expected an @SQ line, got {:?}", line),
        }
        assert_eq!(
            lines[3],
            HeaderLine::Comment("free text\twith a tabulation".to_string())
        );

        // Formatting is the exact inverse here (SO was explicit).
        assert_eq!(to_text(&lines), text);
    }

    #[test]
    fn head_line_must_be_first() {
        let text = "@SQ\tSN:chr1\tLN:100\n@HD\tVN:1.6\n";
        assert_eq!(parse(text), Err(HeaderError::HeaderLineNotFirst(2)));
    }

    #[test]
    fn missing_sort_order_is_unknown() {
        let lines = parse("@HD\tVN:1.6\n").unwrap();
        assert_eq!(
            lines,
            vec![HeaderLine::Head {
                version: "1.6".to_string(),
                sort_order: SortOrder::Unknown,
                extra: vec![],
            }]
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            parse("@SQ\tSN:chr1\n"),
            Err(HeaderError::InvalidLine { line: 1, .. })
        ));
        assert!(matches!(
            parse("@SQ\tSN:chr1\tLN:-5\n"),
            Err(HeaderError::InvalidLine { line: 1, .. })
        ));
        assert!(matches!(
            parse("@HD\tSO:coordinate\n"),
            Err(HeaderError::InvalidLine { line: 1, .. })
        ));
        assert!(matches!(
            parse("not a header\n"),
            Err(HeaderError::InvalidLine { line: 1, .. })
        ));
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert_eq!(parse(""), Ok(vec![]));
        assert_eq!(parse("\n\n"), Ok(vec![]));
    }
}
