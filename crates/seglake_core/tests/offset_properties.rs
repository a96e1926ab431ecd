//! Properties shared by both offset encodings.

use proptest::prelude::*;
use seglake_core::attribute::{VarLenAttributeReader, VarLenAttributeWriter};
use seglake_core::offset::{CompressedOffsets, PlainOffsets, SliceArea};
use seglake_core::{CoreError, OffsetCodec, OffsetConfig, OffsetTable};
use seglake_storage::InMemoryDirectory;

fn offsets_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(prop_oneof![3 => Just(12u64), 1 => 0u64..5000], 0..300).prop_map(
        |lengths| {
            let mut end = 0;
            std::iter::once(0)
                .chain(lengths.into_iter().map(|len| {
                    end += len;
                    end
                }))
                .collect()
        },
    )
}

fn tables(offsets: &[u64], slot_shift: u8, wide: bool) -> Vec<OffsetTable> {
    vec![
        OffsetTable::Plain(PlainOffsets::from_offsets(offsets, wide).unwrap()),
        OffsetTable::Compressed(
            CompressedOffsets::from_offsets(offsets, slot_shift, 64 * 1024, wide).unwrap(),
        ),
    ]
}

proptest! {
    #[test]
    fn encoded_tables_return_every_offset(
        offsets in offsets_strategy(),
        slot_shift in 0u8..7,
        wide in any::<bool>(),
    ) {
        let doc_count = (offsets.len() - 1) as u32;
        for table in tables(&offsets, slot_shift, wide) {
            prop_assert_eq!(table.doc_count(), doc_count);
            prop_assert_eq!(table.is_wide_offset(), wide);
            for (doc, &expected) in offsets.iter().enumerate() {
                prop_assert_eq!(table.get_offset(doc as u32), expected);
            }

            let reopened = OffsetTable::init(
                table.format(),
                doc_count,
                &table.encode(),
                table.encode_slice().as_deref(),
                0,
            )
            .unwrap();
            let all: Vec<u32> = (0..doc_count).collect();
            prop_assert_eq!(reopened.get_offsets(&all), table.get_offsets(&all));
        }
    }

    #[test]
    fn batch_lookups_isolate_bad_ids(
        offsets in offsets_strategy(),
        probes in prop::collection::vec(0u32..400, 1..50),
    ) {
        let doc_count = (offsets.len() - 1) as u32;
        for table in tables(&offsets, 4, false) {
            let results = table.get_offsets(&probes);
            prop_assert_eq!(results.len(), probes.len());
            for (&doc, result) in probes.iter().zip(&results) {
                if doc < doc_count {
                    prop_assert_eq!(*result, Ok(offsets[doc as usize]));
                } else {
                    prop_assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn updates_touch_only_their_doc(
        offsets in offsets_strategy().prop_filter("needs a doc", |o| o.len() > 1),
        updates in prop::collection::vec((any::<prop::sample::Index>(), 0u64..1 << 40), 1..40),
    ) {
        let doc_count = offsets.len() - 1;
        for table in tables(&offsets, 3, true) {
            let mut expected = offsets.clone();
            for (index, value) in &updates {
                let doc = index.index(doc_count);
                match table.set_offset(doc as u32, *value) {
                    Ok(_) => expected[doc] = *value,
                    // refused updates leave the table untouched
                    Err(CoreError::CapacityExceeded { .. }) => {}
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                }
                for (d, &want) in expected.iter().enumerate().take(doc_count) {
                    prop_assert_eq!(table.get_offset(d as u32), want);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn attribute_values_survive_dump_and_updates(
        values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 1..120),
        updates in prop::collection::vec((any::<prop::sample::Index>(), prop::collection::vec(any::<u8>(), 0..80)), 0..30),
        compress in any::<bool>(),
    ) {
        let config = OffsetConfig::new()
            .compress(compress)
            .updatable(true)
            .slot_item_count(8);
        let dir = InMemoryDirectory::new();
        let mut writer = VarLenAttributeWriter::new(config.clone());
        for value in &values {
            writer.add_value(value).unwrap();
        }
        writer.dump(&dir, "segment_0/attribute/a").unwrap();

        let doc_count = values.len() as u32;
        let mut reader =
            VarLenAttributeReader::open(&dir, "segment_0/attribute/a", doc_count, &config).unwrap();
        let mut expected = values.clone();
        for (index, value) in &updates {
            let doc = index.index(values.len());
            match reader.update_field(doc as u32, value) {
                Ok(_) => expected[doc] = value.clone(),
                Err(CoreError::CapacityExceeded { .. }) => {}
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }
        for (doc, want) in expected.iter().enumerate() {
            prop_assert_eq!(&reader.read(doc as u32).unwrap(), want);
        }

        // persisted updates are visible after reopening
        reader.persist(&dir, "segment_0/attribute/a").unwrap();
        let reopened =
            VarLenAttributeReader::open(&dir, "segment_0/attribute/a", doc_count, &config).unwrap();
        for (doc, want) in expected.iter().enumerate() {
            prop_assert_eq!(&reopened.read(doc as u32).unwrap(), want);
        }
    }
}

#[test]
fn slice_area_round_trips_through_persist() {
    let slice = SliceArea::with_capacity_bytes(256);
    assert!(slice.allocate(3).is_some());
    let decoded = SliceArea::decode(&slice.encode(), 256).unwrap();
    assert_eq!(decoded.used_words(), 3);
    assert_eq!(decoded.capacity_words(), slice.capacity_words());
}
