use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

const MIB: u64 = 1024 * 1024;

fn object(key: &str, size: u64) -> ObjectInfo {
    ObjectInfo::new("source", key, size)
}

fn ranges(mapping: &Mapping) -> Vec<(&str, u64, u64)> {
    mapping
        .objects
        .iter()
        .map(|r| (r.key.as_str(), r.initial_byte, r.final_byte))
        .collect()
}

/// Every byte of every object is covered by exactly one range, and no
/// mapping exceeds the bound.
fn assert_exact_cover(objects: &[ObjectInfo], mappings: &[Mapping], chunk_size: u64) {
    let mut covered: BTreeMap<&str, Vec<(u64, u64)>> = BTreeMap::new();
    for mapping in mappings {
        assert!(mapping.size <= chunk_size, "mapping over bound: {}", mapping.size);
        assert_eq!(
            mapping.size,
            mapping.objects.iter().map(ObjectRange::len).sum::<u64>()
        );
        for range in &mapping.objects {
            covered
                .entry(range.key.as_str())
                .or_default()
                .push((range.initial_byte, range.final_byte));
        }
    }
    for object in objects {
        let mut pieces = covered.remove(object.key.as_str()).unwrap_or_default();
        pieces.sort();
        let mut cursor = 0;
        for (start, end) in &pieces {
            assert_eq!(*start, cursor, "gap or overlap in {}", object.key);
            cursor = *end;
        }
        assert_eq!(cursor, object.size, "{} not fully covered", object.key);
    }
}

#[test]
fn test_two_mappings_from_three_objects() {
    let objects = vec![
        object("one", 40 * MIB),
        object("two", 30 * MIB),
        object("three", 10 * MIB),
    ];
    let mappings = partition_objects(&objects, 64 * MIB, ObjectMode::Ranged);

    assert_eq!(mappings.len(), 2);
    assert_eq!(
        ranges(&mappings[0]),
        vec![("one", 0, 40 * MIB), ("two", 0, 24 * MIB)]
    );
    assert_eq!(mappings[0].size, 64 * MIB);
    assert_eq!(
        ranges(&mappings[1]),
        vec![("two", 24 * MIB, 30 * MIB), ("three", 0, 10 * MIB)]
    );
    assert_eq!(mappings[1].size, 16 * MIB);
    assert_ne!(mappings[0].map_id, mappings[1].map_id);
}

#[test]
fn test_oversized_object_spans_several_mappings() {
    let objects = vec![object("small", 10), object("huge", 250)];
    let mappings = partition_objects(&objects, 100, ObjectMode::Ranged);

    assert_eq!(mappings.len(), 3);
    assert_eq!(ranges(&mappings[0]), vec![("small", 0, 10), ("huge", 0, 90)]);
    assert_eq!(ranges(&mappings[1]), vec![("huge", 90, 190)]);
    assert_eq!(ranges(&mappings[2]), vec![("huge", 190, 250)]);
    assert_exact_cover(&objects, &mappings, 100);
}

#[test]
fn test_zero_size_object_gets_a_range() {
    let objects = vec![object("empty", 0)];
    let mappings = partition_objects(&objects, 100, ObjectMode::Ranged);
    assert_eq!(mappings.len(), 1);
    assert_eq!(ranges(&mappings[0]), vec![("empty", 0, 0)]);
    assert_eq!(mappings[0].size, 0);
}

#[test]
fn test_exact_fill_does_not_leave_empty_mapping() {
    let objects = vec![object("a", 50), object("b", 50)];
    let mappings = partition_objects(&objects, 100, ObjectMode::Ranged);
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].size, 100);
}

#[test]
fn test_empty_input_yields_no_mappings() {
    assert!(partition_objects(&[], 100, ObjectMode::Ranged).is_empty());
}

#[test]
fn test_complete_mode_skips_oversized_objects() {
    let objects = vec![object("a", 60), object("too-big", 150), object("b", 60)];
    let mut partitioner = Partitioner::new(100, ObjectMode::Complete);
    let mut mappings = partitioner.push_page(&objects);
    assert_eq!(partitioner.skipped(), &[object("too-big", 150)]);
    mappings.extend(partitioner.finish());

    // b does not fit beside a, so it opens a fresh mapping whole
    assert_eq!(mappings.len(), 2);
    assert_eq!(ranges(&mappings[0]), vec![("a", 0, 60)]);
    assert_eq!(ranges(&mappings[1]), vec![("b", 0, 60)]);
}

#[test]
fn test_pages_carry_open_mapping_over() {
    let page_one = vec![object("a", 30), object("b", 30)];
    let page_two = vec![object("c", 30), object("d", 30)];

    let mut partitioner = Partitioner::new(100, ObjectMode::Ranged);
    let first = partitioner.push_page(&page_one);
    assert!(first.is_empty(), "open mapping must not close at page end");
    let second = partitioner.push_page(&page_two);
    assert_eq!(second.len(), 1);
    let rest = partitioner.finish();

    let all: Vec<Mapping> = second.into_iter().chain(rest).collect();
    assert_eq!(
        ranges(&all[0]),
        vec![("a", 0, 30), ("b", 0, 30), ("c", 0, 30), ("d", 0, 10)]
    );
    assert_eq!(ranges(&all[1]), vec![("d", 10, 30)]);
}

#[test]
fn test_paged_and_single_shot_agree() {
    let mut rng = StdRng::seed_from_u64(7);
    let objects: Vec<ObjectInfo> = (0..200)
        .map(|i| object(&format!("obj-{:03}", i), rng.random_range(0..300)))
        .collect();

    let single = partition_objects(&objects, 256, ObjectMode::Ranged);

    let mut partitioner = Partitioner::new(256, ObjectMode::Ranged);
    let mut paged = Vec::new();
    for page in objects.chunks(17) {
        paged.extend(partitioner.push_page(page));
    }
    paged.extend(partitioner.finish());

    assert_eq!(single.len(), paged.len());
    for (a, b) in single.iter().zip(&paged) {
        assert_eq!(a.objects, b.objects);
        assert_eq!(a.size, b.size);
    }
    assert_exact_cover(&objects, &paged, 256);
}

#[test]
fn test_bound_and_cover_hold_for_random_inputs() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let chunk_size = rng.random_range(1..500);
        let objects: Vec<ObjectInfo> = (0..rng.random_range(0..40))
            .map(|i| object(&format!("k{}", i), rng.random_range(0..2000)))
            .collect();
        let mappings = partition_objects(&objects, chunk_size, ObjectMode::Ranged);
        assert_exact_cover(&objects, &mappings, chunk_size);
    }
}

#[test]
fn test_mapping_json_shape() {
    let mappings = partition_objects(&[object("a", 5)], 10, ObjectMode::Ranged);
    let value = serde_json::to_value(&mappings[0]).unwrap();
    assert!(value.get("mapID").is_some());
    assert_eq!(value["size"], 5);
    assert_eq!(value["objects"][0]["initialByte"], 0);
    assert_eq!(value["objects"][0]["finalByte"], 5);
}
