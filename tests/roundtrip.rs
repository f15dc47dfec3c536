extern crate bamcodec;
extern crate env_logger;
extern crate flate2;
extern crate rand;

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bamcodec::expand::region_to_bin;
use bamcodec::fastq::{FastqReader, FastqRecord, FastqWriter};
use bamcodec::header::{HeaderLine, ReferenceSequence, SortOrder};
use bamcodec::record::cigar::Operation;
use bamcodec::record::tags::{IntegerType, StringType, TagValue};
use bamcodec::record::{
    Alignment, Cigar, Flag, PhredScore, Reference, SequenceValue, RECORD_UNMAPPED,
};
use bamcodec::{BamReader, BamWriter, Item, ItemWriter};

fn write_items(items: &[Item]) -> Vec<u8> {
    let mut compressed = Vec::new();
    {
        let mut writer = BamWriter::from_stream(&mut compressed);
        for item in items {
            writer.write(item.clone()).unwrap();
        }
        writer.finish().unwrap();
    }
    compressed
}

fn read_items(compressed: &[u8], chunk_size: usize) -> Vec<Item> {
    let reader = BamReader::build()
        .chunk_size(chunk_size)
        .from_stream(compressed);
    reader.map(|item| item.unwrap()).collect()
}

fn sample_dictionary() -> Vec<ReferenceSequence> {
    vec![
        ReferenceSequence::new("chr1", 248_956_422),
        ReferenceSequence::new("chrM", 16_569),
    ]
}

fn sample_items() -> Vec<Item> {
    let dictionary = sample_dictionary();
    let mut mapped = Alignment::new("mapped/1");
    mapped.flag = Flag(99);
    mapped.reference = Reference::Sequence(dictionary[0].clone());
    mapped.position = Some(1001);
    mapped.mapping_quality = Some(60);
    mapped.cigar = Cigar::from_ops(vec![(4, Operation::AlnMatch), (2, Operation::Soft)]);
    mapped.mate_reference = Reference::Sequence(dictionary[1].clone());
    mapped.mate_position = Some(2001);
    mapped.template_len = 180;
    mapped.sequence = SequenceValue::Text("ACGTNN".to_string());
    mapped.qualities = vec![
        PhredScore::from_raw(30),
        PhredScore::from_raw(31),
        PhredScore::from_raw(32),
        PhredScore::from_raw(33),
        PhredScore::from_raw(2),
        PhredScore::from_raw(2),
    ];
    mapped.tags = vec![
        (*b"NM", TagValue::Int(5, IntegerType::I32)),
        (*b"MD", TagValue::String(b"6".to_vec(), StringType::String)),
        (*b"XB", TagValue::IntArray(vec![1, -2, 3], IntegerType::I16)),
    ];

    let unmapped = Alignment::new("unmapped/1");

    vec![
        Item::Header(HeaderLine::Head {
            version: "1.6".to_string(),
            sort_order: SortOrder::Coordinate,
            extra: Vec::new(),
        }),
        Item::Header(HeaderLine::RefSequence {
            name: "chr1".to_string(),
            len: 248_956_422,
            extra: Vec::new(),
        }),
        Item::Header(HeaderLine::RefSequence {
            name: "chrM".to_string(),
            len: 16_569,
            extra: Vec::new(),
        }),
        Item::Header(HeaderLine::Comment("written by a test".to_string())),
        Item::ReferenceSequenceDictionary(dictionary),
        Item::Alignment(mapped),
        Item::Alignment(unmapped),
    ]
}

/// The expander turns an unmapped record's absent sequence into an empty
/// text sequence, which is what the writer stored.
fn expected_after_roundtrip(mut items: Vec<Item>) -> Vec<Item> {
    for item in items.iter_mut() {
        if let Item::Alignment(aln) = item {
            if aln.sequence == SequenceValue::Missing {
                aln.sequence = SequenceValue::Text(String::new());
            }
        }
    }
    items
}

#[test]
fn bam_roundtrip() {
    let _ = env_logger::builder().is_test(true).try_init();
    let items = sample_items();
    let compressed = write_items(&items);
    assert_eq!(
        read_items(&compressed, 65536),
        expected_after_roundtrip(items)
    );
}

#[test]
fn bam_roundtrip_one_byte_chunks() {
    let items = sample_items();
    let compressed = write_items(&items);
    assert_eq!(read_items(&compressed, 1), expected_after_roundtrip(items));
}

#[test]
fn reads_plain_gzip_streams() {
    // A BAM stream compressed by a generic gzip writer, not member by member.
    let mut raw = Vec::new();
    raw.extend_from_slice(b"BAM\x01");
    raw.extend_from_slice(&0_i32.to_le_bytes()); // l_text
    raw.extend_from_slice(&0_i32.to_le_bytes()); // n_ref

    // S1: one unmapped read named "r1" with no sequence.
    let mut block = Vec::new();
    block.extend_from_slice(&(-1_i32).to_le_bytes()); // ref_id
    block.extend_from_slice(&(-1_i32).to_le_bytes()); // pos
    block.push(3); // l_read_name
    block.push(255); // mapq
    block.extend_from_slice(&4680_u16.to_le_bytes()); // bin
    block.extend_from_slice(&0_u16.to_le_bytes()); // n_cigar_op
    block.extend_from_slice(&4_u16.to_le_bytes()); // flag
    block.extend_from_slice(&0_i32.to_le_bytes()); // l_seq
    block.extend_from_slice(&(-1_i32).to_le_bytes()); // next_ref_id
    block.extend_from_slice(&(-1_i32).to_le_bytes()); // next_pos
    block.extend_from_slice(&0_i32.to_le_bytes()); // tlen
    block.extend_from_slice(b"r1\x00");
    raw.extend_from_slice(&(block.len() as i32).to_le_bytes());
    raw.extend_from_slice(&block);

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    let compressed = encoder.finish().unwrap();

    let items = read_items(&compressed, 7);
    let mut expected_alignment = Alignment::new("r1");
    expected_alignment.flag = Flag(RECORD_UNMAPPED);
    expected_alignment.sequence = SequenceValue::Text(String::new());
    assert_eq!(
        items,
        vec![
            Item::ReferenceSequenceDictionary(Vec::new()),
            Item::Alignment(expected_alignment),
        ]
    );
}

#[test]
fn corrupted_stream_yields_one_error() {
    let items = sample_items();
    let mut compressed = write_items(&items);
    // Flip a byte inside the first member's payload.
    let index = compressed.len() / 3;
    compressed[index] ^= 0xa5;

    let reader = BamReader::build().chunk_size(64).from_stream(&compressed[..]);
    let mut errors = 0;
    for item in reader {
        if item.is_err() {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
}

fn random_alignment<R: Rng>(rng: &mut R, dictionary: &[ReferenceSequence]) -> Alignment {
    let name_len = rng.gen_range(1..=20);
    let name: String = (0..name_len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    let mut aln = Alignment::new(name);

    if rng.gen_bool(0.8) {
        let ref_id = rng.gen_range(0..dictionary.len());
        aln.flag = Flag(if rng.gen_bool(0.5) { 0 } else { 16 });
        aln.reference = Reference::Sequence(dictionary[ref_id].clone());
        aln.position = Some(rng.gen_range(1..=1_000_000));
        aln.mapping_quality = if rng.gen_bool(0.9) {
            Some(rng.gen_range(0..=93))
        } else {
            None
        };
    } else {
        aln.flag = Flag(RECORD_UNMAPPED);
    }

    let seq_len = rng.gen_range(0..=60);
    let sequence: String = (0..seq_len)
        .map(|_| b"ACGTN"[rng.gen_range(0..5)] as char)
        .collect();
    aln.qualities = (0..seq_len)
        .map(|_| PhredScore::from_raw(rng.gen_range(0..=93)))
        .collect();
    if aln.reference.is_none() {
        aln.sequence = SequenceValue::Text(sequence);
    } else {
        aln.cigar = Cigar::from_ops(vec![(seq_len as u32, Operation::AlnMatch)]);
        aln.sequence = SequenceValue::Text(sequence);
    }
    aln.template_len = rng.gen_range(-10_000..=10_000);

    if rng.gen_bool(0.5) {
        aln.tags.push((
            *b"NM",
            TagValue::Int(rng.gen_range(0..100), IntegerType::U8),
        ));
    }
    if rng.gen_bool(0.3) {
        aln.tags.push((
            *b"ZZ",
            TagValue::String(b"random".to_vec(), StringType::String),
        ));
    }
    aln
}

#[test]
fn random_records_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let dictionary = sample_dictionary();
    let mut items = vec![
        Item::Header(HeaderLine::Head {
            version: "1.6".to_string(),
            sort_order: SortOrder::Unsorted,
            extra: Vec::new(),
        }),
        Item::ReferenceSequenceDictionary(dictionary.clone()),
    ];
    for _ in 0..100 {
        items.push(Item::Alignment(random_alignment(&mut rng, &dictionary)));
    }

    let compressed = write_items(&items);
    assert_eq!(
        read_items(&compressed, 4096),
        expected_after_roundtrip(items)
    );
}

#[test]
fn recomputed_bins_follow_the_ucsc_ladder() {
    // S2 family: the mandated formula over [pos, pos + len).
    assert_eq!(region_to_bin(0, 100), 4681);
    assert_eq!(region_to_bin(-1, -1), 4680);
    assert_eq!(region_to_bin(1 << 17, (1 << 17) + 1), 4689);
    assert_eq!(region_to_bin(0, (1 << 17) + 1), 73);
}

#[test]
fn fastq_roundtrip() {
    let records = vec![
        FastqRecord {
            name: "SRR001 1:N:0:AA".to_string(),
            sequence: "ACGTACGT".to_string(),
            comment: String::new(),
            qualities: "IIIIIIII".to_string(),
        },
        FastqRecord {
            name: "SRR002".to_string(),
            sequence: String::new(),
            comment: "kept comment".to_string(),
            qualities: String::new(),
        },
    ];

    let mut text = Vec::new();
    {
        let mut writer = FastqWriter::from_stream(&mut text);
        for record in &records {
            writer.write(record.clone()).unwrap();
        }
        writer.finish().unwrap();
    }
    assert_eq!(
        std::str::from_utf8(&text).unwrap(),
        "@SRR001 1:N:0:AA\nACGTACGT\n+\nIIIIIIII\n@SRR002\n\n+kept comment\n\n"
    );

    let reader = FastqReader::from_stream(&text[..]);
    let parsed: Vec<FastqRecord> = reader.map(|record| record.unwrap()).collect();
    assert_eq!(parsed, records);
}
