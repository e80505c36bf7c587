//! Duplicate suppression keys for accidents and events.
use roadmesh::relay::dedup::{dedup_by_key, DedupKey};
use roadmesh::relay::LocatedEvent;
use roadmesh::traffic::EventRecord;

fn located(id: &str, roadway: &str, description: &str, updated: &str, place: &str) -> LocatedEvent {
    LocatedEvent::new(
        EventRecord {
            id: id.into(),
            roadway_name: Some(roadway.into()),
            direction_of_travel: Some("West".into()),
            description: Some(description.into()),
            event_type: Some("accidentsAndIncidents".into()),
            last_updated: Some(updated.into()),
            ..Default::default()
        },
        Some(place.into()),
    )
}

#[test]
fn accident_description_does_not_affect_key() {
    let a = located("1", "I-10", "Crash", "2025-12-11 14:30:00 MST", "Tempe");
    let b = located("2", "I-10", "Two vehicle crash", "2025-12-11 14:30:00 MST", "Tempe");
    assert_eq!(DedupKey::accident(&a), DedupKey::accident(&b));
}

#[test]
fn accident_update_time_is_part_of_key() {
    let a = located("1", "I-10", "Crash", "2025-12-11 14:30:00 MST", "Tempe");
    let b = located("1", "I-10", "Crash", "2025-12-11 14:45:00 MST", "Tempe");
    assert_ne!(DedupKey::accident(&a), DedupKey::accident(&b));
}

#[test]
fn event_key_ignores_update_time_but_not_location() {
    let a = located("1", "SR-87", "Roadwork", "2025-12-11 14:30:00 MST", "Payson");
    let b = located("2", "SR-87", "Roadwork", "2025-12-11 18:00:00 MST", "Payson");
    let c = located("3", "SR-87", "Roadwork", "2025-12-11 14:30:00 MST", "Pine");
    assert_eq!(DedupKey::event(&a), DedupKey::event(&b));
    assert_ne!(DedupKey::event(&a), DedupKey::event(&c));
}

#[test]
fn batch_keeps_first_of_each_key_in_order() {
    let items = vec![
        located("1", "I-10", "a", "t1", "Tempe"),
        located("2", "I-17", "b", "t1", "Anthem"),
        located("3", "I-10", "c", "t1", "Tempe"),
        located("4", "I-17", "d", "t1", "Anthem"),
    ];
    let (kept, stats) = dedup_by_key(items, DedupKey::accident);
    let ids: Vec<&str> = kept.iter().map(|e| e.record.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(stats.emitted, 2);
    assert_eq!(stats.skipped, 2);
}
