//! Conversion between raw BAM items and logical SAM items.
//!
//! The [Expander](struct.Expander.html) raises [RawItem](../raw/enum.RawItem.html)s
//! into the rich [Item](enum.Item.html) model: header text becomes typed
//! header lines, the reference information becomes the dictionary item, and
//! alignments are validated, cross-linked against the dictionary and fully
//! decoded. The [Downgrader](struct.Downgrader.html) performs the inverse,
//! recomputing the wire-only fields (such as the UCSC bin) along the way.

use std::collections::VecDeque;

use log::{debug, warn};
use thiserror::Error;

use crate::header::{self, HeaderError, HeaderLine, ReferenceSequence};
use crate::raw::{RawAlignment, RawItem};
use crate::record::cigar::CigarError;
use crate::record::tags::{self, AuxError};
use crate::record::{
    Alignment, Cigar, Flag, PhredScore, Reference, Sequence, SequenceValue, PHRED_MISSING,
};
use crate::transform::{Next, Transform};

/// Biggest representable 0-based position (`2^29 - 2`).
pub const MAX_POSITION: i32 = 536_870_910;
/// Biggest representable absolute template length (`2^29 - 1`).
pub const MAX_TEMPLATE_LEN: i32 = 536_870_911;
/// Longest representable read name (its length is stored in a byte,
/// together with the trailing null).
pub const MAX_NAME_LEN: usize = 254;

/// A fully decoded item of a BAM/SAM stream.
///
/// Stream order is fixed: header lines first, then the reference dictionary
/// exactly once, then alignments.
#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Header(HeaderLine),
    ReferenceSequenceDictionary(Vec<ReferenceSequence>),
    Alignment(Alignment),
}

/// Error produced while expanding raw alignments.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ExpandError {
    /// Read name empty, too long or not UTF-8.
    #[error("invalid read name {0:?}")]
    WrongName(String),
    /// Position outside `-1..=MAX_POSITION`.
    #[error("position {0} out of range")]
    WrongPosition(i32),
    /// Mate position outside `-1..=MAX_POSITION`.
    #[error("mate position {0} out of range")]
    WrongMatePosition(i32),
    /// Template length outside `-MAX_TEMPLATE_LEN..=MAX_TEMPLATE_LEN`.
    #[error("template length {0} out of range")]
    WrongTemplateLength(i32),
    /// Reference id neither -1 nor an index into the dictionary.
    #[error("reference id {0} is not in the reference dictionary")]
    ReferenceSequenceNotFound(i32),
    #[error("{0}")]
    Cigar(#[from] CigarError),
    #[error("{0}")]
    Aux(#[from] AuxError),
    #[error("{0}")]
    Header(#[from] HeaderError),
}

/// Error produced while downgrading logical items.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DowngradeError {
    /// A named reference is not in the dictionary.
    #[error("reference '{0}' is not in the reference dictionary")]
    ReferenceNameNotFound(String),
    /// The record's sequence is reference-equal, so there is nothing to
    /// store.
    #[error("cannot get a sequence for the record")]
    CannotGetSequence,
    /// The sequence text holds a symbol outside the 16-letter alphabet.
    #[error("invalid sequence: {0}")]
    WrongSequence(String),
    /// Read name empty or too long.
    #[error("invalid read name {0:?}")]
    WrongName(String),
    /// Position outside `1..=MAX_POSITION + 1`.
    #[error("position {0} out of range")]
    WrongPosition(i32),
    /// Mate position outside `1..=MAX_POSITION + 1`.
    #[error("mate position {0} out of range")]
    WrongMatePosition(i32),
    /// Template length outside `-MAX_TEMPLATE_LEN..=MAX_TEMPLATE_LEN`.
    #[error("template length {0} out of range")]
    WrongTemplateLength(i32),
}

/// Returns the UCSC bin of the 0-based half-open interval `[beg, end)`.
///
/// The ladder descends from 16 kb bins (shift 14) to 512 Mb bins (shift 26);
/// an interval spanning none of them lands in bin 0. Arithmetic shifts make
/// the unmapped extent `[-1, -1)` land in bin 4680.
pub fn region_to_bin(beg: i32, end: i32) -> u16 {
    for &shift in &[14, 17, 20, 23, 26] {
        if beg >> shift == end >> shift {
            return (((1 << (29 - shift)) - 1) / 7 + (beg >> shift)) as u16;
        }
    }
    0
}

fn check_position(pos: i32) -> bool {
    (-1..=MAX_POSITION).contains(&pos)
}

fn check_template_len(len: i32) -> bool {
    (i64::from(len)).abs() <= i64::from(MAX_TEMPLATE_LEN)
}

fn resolve_id(
    dictionary: Option<&[ReferenceSequence]>,
    id: i32,
) -> Result<Reference, ExpandError> {
    if id == -1 {
        return Ok(Reference::None);
    }
    match dictionary {
        Some(refs) if id >= 0 && (id as usize) < refs.len() => {
            Ok(Reference::Sequence(refs[id as usize].clone()))
        }
        _ => Err(ExpandError::ReferenceSequenceNotFound(id)),
    }
}

fn resolve_name(
    dictionary: Option<&[ReferenceSequence]>,
    reference: &Reference,
) -> Result<i32, DowngradeError> {
    let name = match reference.name() {
        None => return Ok(-1),
        Some(name) => name,
    };
    dictionary
        .unwrap_or(&[])
        .iter()
        .position(|seq| seq.name == name)
        .map(|index| index as i32)
        .ok_or_else(|| DowngradeError::ReferenceNameNotFound(name.to_string()))
}

/// Transform that expands raw BAM items into logical items.
///
/// The reference dictionary is stored when the reference information record
/// arrives and emitted exactly once, immediately before the first alignment
/// (the freshly received alignment is pushed back to the head of the queue
/// to achieve this ordering).
pub struct Expander {
    queue: VecDeque<RawItem>,
    pending: VecDeque<Item>,
    dictionary: Option<Vec<ReferenceSequence>>,
    dictionary_emitted: bool,
    failed: bool,
}

impl Expander {
    pub fn new() -> Self {
        Expander {
            queue: VecDeque::new(),
            pending: VecDeque::new(),
            dictionary: None,
            dictionary_emitted: false,
            failed: false,
        }
    }

    fn fail(&mut self, e: ExpandError) -> Next<Item, ExpandError> {
        self.failed = true;
        Next::Ready(Err(e))
    }

    fn emit_dictionary(&mut self) -> Next<Item, ExpandError> {
        self.dictionary_emitted = true;
        let dictionary = self.dictionary.clone().unwrap_or_default();
        debug!("Emitting reference dictionary: {} entries", dictionary.len());
        Next::Ready(Ok(Item::ReferenceSequenceDictionary(dictionary)))
    }

    fn expand_alignment(&self, raw: RawAlignment) -> Result<Alignment, ExpandError> {
        let name = String::from_utf8(raw.name)
            .map_err(|e| ExpandError::WrongName(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(ExpandError::WrongName(name));
        }
        if !check_position(raw.pos) {
            return Err(ExpandError::WrongPosition(raw.pos));
        }
        if !check_position(raw.mate_pos) {
            return Err(ExpandError::WrongMatePosition(raw.mate_pos));
        }
        if !check_template_len(raw.template_len) {
            return Err(ExpandError::WrongTemplateLength(raw.template_len));
        }
        let dictionary = self.dictionary.as_deref();
        let reference = resolve_id(dictionary, raw.ref_id)?;
        let mate_reference = resolve_id(dictionary, raw.mate_ref_id)?;
        let cigar = Cigar::from_bytes(&raw.cigar)?;
        let tags = tags::parse(&raw.tags)?;

        Ok(Alignment {
            name,
            flag: Flag(raw.flag),
            reference,
            position: if raw.pos == -1 { None } else { Some(raw.pos + 1) },
            mapping_quality: if raw.mapq == PHRED_MISSING {
                None
            } else {
                Some(raw.mapq)
            },
            cigar,
            mate_reference,
            mate_position: if raw.mate_pos == -1 {
                None
            } else {
                Some(raw.mate_pos + 1)
            },
            template_len: raw.template_len,
            sequence: SequenceValue::Text(raw.seq.to_text()),
            qualities: raw.qual.iter().cloned().map(PhredScore::from_raw).collect(),
            tags,
        })
    }
}

impl Default for Expander {
    fn default() -> Self {
        Expander::new()
    }
}

impl Transform for Expander {
    type Input = RawItem;
    type Output = Item;
    type Error = ExpandError;

    fn feed(&mut self, item: RawItem) {
        self.queue.push_back(item);
    }

    fn next(&mut self, stopped: bool) -> Next<Item, ExpandError> {
        if self.failed {
            return Next::End;
        }
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Next::Ready(Ok(item));
            }
            match self.queue.pop_front() {
                Some(RawItem::Header(text)) => match header::parse(&text) {
                    Ok(lines) => self.pending.extend(lines.into_iter().map(Item::Header)),
                    Err(e) => return self.fail(e.into()),
                },
                Some(RawItem::ReferenceInformation(refs)) => {
                    self.dictionary = Some(refs);
                }
                Some(RawItem::Alignment(raw)) => {
                    if !self.dictionary_emitted {
                        self.queue.push_front(RawItem::Alignment(raw));
                        return self.emit_dictionary();
                    }
                    return match self.expand_alignment(raw) {
                        Ok(alignment) => Next::Ready(Ok(Item::Alignment(alignment))),
                        Err(e) => self.fail(e),
                    };
                }
                None => {
                    if !stopped {
                        return Next::NotReady;
                    }
                    // A stream may end without alignments; the stored
                    // dictionary is still part of the logical stream.
                    if !self.dictionary_emitted && self.dictionary.is_some() {
                        return self.emit_dictionary();
                    }
                    return Next::End;
                }
            }
        }
    }
}

/// Transform that downgrades logical items into raw BAM items.
///
/// Header lines are folded back into text and flushed as the raw header when
/// the dictionary item arrives; the reference information record is emitted
/// once before the first alignment, with the same re-queue trick the
/// expander uses.
pub struct Downgrader {
    queue: VecDeque<Item>,
    outputs: VecDeque<RawItem>,
    header_text: String,
    header_flushed: bool,
    dictionary: Option<Vec<ReferenceSequence>>,
    dictionary_emitted: bool,
    failed: bool,
}

impl Downgrader {
    pub fn new() -> Self {
        Downgrader {
            queue: VecDeque::new(),
            outputs: VecDeque::new(),
            header_text: String::new(),
            header_flushed: false,
            dictionary: None,
            dictionary_emitted: false,
            failed: false,
        }
    }

    fn fail(&mut self, e: DowngradeError) -> Next<RawItem, DowngradeError> {
        self.failed = true;
        Next::Ready(Err(e))
    }

    fn flush_header(&mut self) {
        self.header_flushed = true;
        let text = std::mem::replace(&mut self.header_text, String::new());
        self.outputs.push_back(RawItem::Header(text));
    }

    fn emit_reference_information(&mut self) {
        self.dictionary_emitted = true;
        self.outputs.push_back(RawItem::ReferenceInformation(
            self.dictionary.clone().unwrap_or_default(),
        ));
    }

    fn downgrade_alignment(&self, alignment: Alignment) -> Result<RawAlignment, DowngradeError> {
        if alignment.name.is_empty() || alignment.name.len() > MAX_NAME_LEN {
            return Err(DowngradeError::WrongName(alignment.name));
        }
        let dictionary = self.dictionary.as_deref();
        let ref_id = resolve_name(dictionary, &alignment.reference)?;
        let mate_ref_id = resolve_name(dictionary, &alignment.mate_reference)?;

        let pos = match alignment.position {
            None => -1,
            Some(one_based) if one_based >= 1 => one_based - 1,
            Some(one_based) => return Err(DowngradeError::WrongPosition(one_based)),
        };
        if !check_position(pos) {
            return Err(DowngradeError::WrongPosition(pos));
        }
        let mate_pos = match alignment.mate_position {
            None => -1,
            Some(one_based) if one_based >= 1 => one_based - 1,
            Some(one_based) => return Err(DowngradeError::WrongMatePosition(one_based)),
        };
        if !check_position(mate_pos) {
            return Err(DowngradeError::WrongMatePosition(mate_pos));
        }
        if !check_template_len(alignment.template_len) {
            return Err(DowngradeError::WrongTemplateLength(alignment.template_len));
        }

        let seq = match &alignment.sequence {
            SequenceValue::Text(text) => Sequence::from_text(text.bytes())
                .map_err(DowngradeError::WrongSequence)?,
            SequenceValue::Missing => Sequence::new(),
            SequenceValue::EqualToReference => return Err(DowngradeError::CannotGetSequence),
        };
        if !alignment.qualities.is_empty() && alignment.qualities.len() != seq.len() {
            warn!(
                "Record {}: {} qualities for {} bases, storing missing qualities",
                alignment.name,
                alignment.qualities.len(),
                seq.len()
            );
        }
        let mut cigar = Vec::new();
        alignment.cigar.to_bytes(&mut cigar);
        let mut tag_blob = Vec::new();
        tags::unparse(&alignment.tags, &mut tag_blob);

        Ok(RawAlignment {
            name: alignment.name.into_bytes(),
            flag: alignment.flag.0,
            ref_id,
            pos,
            mapq: alignment.mapping_quality.unwrap_or(PHRED_MISSING),
            bin: region_to_bin(pos, pos + seq.len() as i32),
            cigar,
            mate_ref_id,
            mate_pos,
            template_len: alignment.template_len,
            qual: alignment.qualities.iter().map(|q| q.to_int()).collect(),
            seq,
            tags: tag_blob,
        })
    }
}

impl Default for Downgrader {
    fn default() -> Self {
        Downgrader::new()
    }
}

impl Transform for Downgrader {
    type Input = Item;
    type Output = RawItem;
    type Error = DowngradeError;

    fn feed(&mut self, item: Item) {
        self.queue.push_back(item);
    }

    fn next(&mut self, stopped: bool) -> Next<RawItem, DowngradeError> {
        if self.failed {
            return Next::End;
        }
        loop {
            if let Some(item) = self.outputs.pop_front() {
                return Next::Ready(Ok(item));
            }
            match self.queue.pop_front() {
                Some(Item::Header(line)) => {
                    header::write_line(&line, &mut self.header_text);
                    self.header_text.push('\n');
                }
                Some(Item::ReferenceSequenceDictionary(refs)) => {
                    self.flush_header();
                    self.dictionary = Some(refs);
                }
                Some(Item::Alignment(alignment)) => {
                    if !self.dictionary_emitted {
                        if !self.header_flushed {
                            self.flush_header();
                        }
                        self.emit_reference_information();
                        self.queue.push_front(Item::Alignment(alignment));
                        continue;
                    }
                    return match self.downgrade_alignment(alignment) {
                        Ok(raw) => Next::Ready(Ok(RawItem::Alignment(raw))),
                        Err(e) => self.fail(e),
                    };
                }
                None => {
                    if !stopped {
                        return Next::NotReady;
                    }
                    // Flush what a stream without alignments left behind.
                    if !self.header_flushed {
                        self.flush_header();
                        continue;
                    }
                    if !self.dictionary_emitted && self.dictionary.is_some() {
                        self.emit_reference_information();
                        continue;
                    }
                    return Next::End;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cigar::Operation;
    use crate::record::tags::{IntegerType, TagValue};

    fn drain_expander(expander: &mut Expander, stopped: bool) -> Vec<Item> {
        let mut items = Vec::new();
        while let Next::Ready(result) = expander.next(stopped) {
            items.push(result.unwrap());
        }
        items
    }

    fn raw_unmapped(name: &[u8]) -> RawAlignment {
        RawAlignment {
            name: name.to_vec(),
            flag: 4,
            ref_id: -1,
            pos: -1,
            mapq: 255,
            bin: 4680,
            cigar: Vec::new(),
            mate_ref_id: -1,
            mate_pos: -1,
            template_len: 0,
            seq: Sequence::new(),
            qual: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn bin_computation() {
        assert_eq!(region_to_bin(0, 100), 4681);
        assert_eq!(region_to_bin(-1, -1), 4680);
        assert_eq!(region_to_bin(9, 9), 4681);
        assert_eq!(region_to_bin(1 << 14, (1 << 14) + 100), 4682);
        // An interval crossing a 16 kb boundary climbs one level.
        assert_eq!(region_to_bin((1 << 14) - 10, (1 << 14) + 10), 585);
        assert_eq!(region_to_bin(0, 1 << 29), 0);
    }

    #[test]
    fn dictionary_precedes_first_alignment() {
        let mut expander = Expander::new();
        expander.feed(RawItem::Header("@HD\tVN:1.6\n".to_string()));
        expander.feed(RawItem::ReferenceInformation(vec![ReferenceSequence::new(
            "chr1", 1000,
        )]));
        expander.feed(RawItem::Alignment(raw_unmapped(b"r1")));

        let items = drain_expander(&mut expander, true);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Item::Header(_)));
        assert_eq!(
            items[1],
            Item::ReferenceSequenceDictionary(vec![ReferenceSequence::new("chr1", 1000)])
        );
        match &items[2] {
            Item::Alignment(aln) => {
                assert_eq!(aln.name, "r1");
                assert_eq!(aln.position, None);
                assert_eq!(aln.mapping_quality, None);
                assert_eq!(aln.sequence, SequenceValue::Text(String::new()));
                assert!(!aln.flag.is_mapped());
            }
            item => panic!("Expected an alignment, got {:?}", item),
        }
    }

    #[test]
    fn dictionary_is_emitted_without_alignments() {
        let mut expander = Expander::new();
        expander.feed(RawItem::Header(String::new()));
        expander.feed(RawItem::ReferenceInformation(Vec::new()));
        let items = drain_expander(&mut expander, true);
        assert_eq!(items, vec![Item::ReferenceSequenceDictionary(Vec::new())]);
    }

    #[test]
    fn expansion_validates_bounds() {
        let mut expander = Expander::new();
        expander.dictionary = Some(Vec::new());
        expander.dictionary_emitted = true;

        let mut bad_pos = raw_unmapped(b"r1");
        bad_pos.pos = MAX_POSITION + 1;
        assert_eq!(
            expander.expand_alignment(bad_pos),
            Err(ExpandError::WrongPosition(MAX_POSITION + 1))
        );

        let mut bad_ref = raw_unmapped(b"r1");
        bad_ref.ref_id = 2;
        assert_eq!(
            expander.expand_alignment(bad_ref),
            Err(ExpandError::ReferenceSequenceNotFound(2))
        );

        let bad_name = raw_unmapped(b"");
        assert_eq!(
            expander.expand_alignment(bad_name),
            Err(ExpandError::WrongName(String::new()))
        );

        let mut bad_tlen = raw_unmapped(b"r1");
        bad_tlen.template_len = i32::MIN;
        assert_eq!(
            expander.expand_alignment(bad_tlen),
            Err(ExpandError::WrongTemplateLength(i32::MIN))
        );
    }

    #[test]
    fn roundtrip_through_downgrader() {
        let dictionary = vec![
            ReferenceSequence::new("chr1", 1000),
            ReferenceSequence::new("chr2", 2000),
        ];
        let alignment = Alignment {
            name: "read7".to_string(),
            flag: Flag(99),
            reference: Reference::Sequence(dictionary[1].clone()),
            position: Some(11),
            mapping_quality: Some(37),
            cigar: Cigar::from_ops(vec![(3, Operation::AlnMatch), (1, Operation::Soft)]),
            mate_reference: Reference::Name("chr1".to_string()),
            mate_position: Some(101),
            template_len: -90,
            sequence: SequenceValue::Text("ACGT".to_string()),
            qualities: vec![
                PhredScore::from_raw(20),
                PhredScore::from_raw(21),
                PhredScore::from_raw(22),
                PhredScore::from_raw(23),
            ],
            tags: vec![(*b"NM", TagValue::Int(5, IntegerType::I32))],
        };

        let mut downgrader = Downgrader::new();
        downgrader.feed(Item::Header(HeaderLine::Comment("note".to_string())));
        downgrader.feed(Item::ReferenceSequenceDictionary(dictionary.clone()));
        downgrader.feed(Item::Alignment(alignment.clone()));

        let mut raw_items = Vec::new();
        loop {
            match downgrader.next(true) {
                Next::Ready(result) => raw_items.push(result.unwrap()),
                Next::End => break,
                Next::NotReady => unreachable!(),
            }
        }
        assert_eq!(raw_items.len(), 3);
        assert_eq!(raw_items[0], RawItem::Header("@CO\tnote\n".to_string()));
        assert_eq!(
            raw_items[1],
            RawItem::ReferenceInformation(dictionary.clone())
        );
        match &raw_items[2] {
            RawItem::Alignment(raw) => {
                assert_eq!(raw.ref_id, 1);
                assert_eq!(raw.mate_ref_id, 0);
                assert_eq!(raw.pos, 10);
                assert_eq!(raw.bin, region_to_bin(10, 14));
                assert_eq!(raw.mapq, 37);
            }
            item => panic!("Expected an alignment, got {:?}", item),
        }

        // And back up: the expanded record equals the original, with the
        // by-name mate reference now resolved through the dictionary.
        let mut expander = Expander::new();
        for item in raw_items {
            expander.feed(item);
        }
        let items = drain_expander(&mut expander, true);
        match items.last() {
            Some(Item::Alignment(expanded)) => {
                let mut expected = alignment;
                expected.mate_reference = Reference::Sequence(dictionary[0].clone());
                assert_eq!(expanded, &expected);
            }
            item => panic!("Expected an alignment, got {:?}", item),
        }
    }

    #[test]
    fn downgrade_rejects_reference_equal_sequences() {
        let mut downgrader = Downgrader::new();
        downgrader.dictionary = Some(Vec::new());
        downgrader.dictionary_emitted = true;
        let mut alignment = Alignment::new("r1");
        alignment.sequence = SequenceValue::EqualToReference;
        assert_eq!(
            downgrader.downgrade_alignment(alignment),
            Err(DowngradeError::CannotGetSequence)
        );
    }

    #[test]
    fn downgrade_rejects_unknown_references() {
        let mut downgrader = Downgrader::new();
        downgrader.dictionary = Some(vec![ReferenceSequence::new("chr1", 1000)]);
        downgrader.dictionary_emitted = true;
        let mut alignment = Alignment::new("r1");
        alignment.reference = Reference::Name("chrX".to_string());
        assert_eq!(
            downgrader.downgrade_alignment(alignment),
            Err(DowngradeError::ReferenceNameNotFound("chrX".to_string()))
        );
    }
}
