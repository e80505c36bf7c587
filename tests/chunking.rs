//! Fragment sizing and reconstruction for outbound text.
use roadmesh::relay::chunker::{chunk_message, CONTINUATION_MARKER};

fn non_ws(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn rejoin(chunks: &[String]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.as_str()
            } else {
                c.strip_prefix(CONTINUATION_MARKER).unwrap_or(c)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn short_text_is_untouched() {
    let text = "ALERT: I-17 closed at Sunset Point";
    assert_eq!(chunk_message(text, 200), vec![text.to_string()]);
}

#[test]
fn exact_fit_is_untouched() {
    let text = "x".repeat(200);
    assert_eq!(chunk_message(&text, 200), vec![text]);
}

#[test]
fn every_fragment_fits_and_nothing_is_lost() {
    let text = "ACCIDENT: Loop 101 Pima Freeway (Southbound) Lanes: Left lane, HOV lane, \
                Right shoulder @ Scottsdale Road, Scottsdale [1h12m ago] \
                ROADWORK: SR-87 (North) @ Beeline Highway, Fountain Hills";
    for max in [20usize, 37, 64, 100] {
        let chunks = chunk_message(text, max);
        assert!(chunks.len() > 1, "max={} should split", max);
        for c in &chunks {
            assert!(c.len() <= max, "fragment {:?} exceeds {}", c, max);
        }
        assert_eq!(non_ws(&rejoin(&chunks)), non_ws(text), "max={}", max);
    }
}

#[test]
fn continuation_fragments_are_marked() {
    let text = "word ".repeat(30);
    let chunks = chunk_message(&text, 32);
    assert!(!chunks[0].starts_with(CONTINUATION_MARKER));
    assert!(chunks[1..].iter().all(|c| c.starts_with(CONTINUATION_MARKER)));
}

#[test]
fn location_stays_with_at_sign() {
    let chunks = chunk_message("CLOSURE: SR-260 (West) @ Christopher Creek, Payson", 30);
    assert_eq!(chunks[0], "CLOSURE: SR-260 (West)");
    assert!(chunks[1].starts_with("...@ Christopher"));
}

#[test]
fn multibyte_text_never_splits_a_char() {
    let text = "Température élevée ☀️ sur l'autoroute → prudence conseillée à tous";
    let chunks = chunk_message(text, 16);
    for c in &chunks {
        assert!(c.len() <= 16);
        assert!(std::str::from_utf8(c.as_bytes()).is_ok());
    }
    assert_eq!(non_ws(&rejoin(&chunks)), non_ws(text));
}

#[test]
fn unbroken_text_is_hard_cut() {
    let text = "A".repeat(50);
    let chunks = chunk_message(&text, 20);
    assert_eq!(chunks[0], "A".repeat(20));
    assert!(chunks.iter().all(|c| c.len() <= 20));
    assert_eq!(non_ws(&rejoin(&chunks)), text);
}

#[test]
fn trailing_spaces_never_end_a_fragment() {
    let text = "word ".repeat(30);
    let chunks = chunk_message(&text, 32);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.len() <= 32);
        assert!(!chunk.ends_with(char::is_whitespace), "fragment {:?}", chunk);
    }
    assert_eq!(non_ws(&rejoin(&chunks)), non_ws(&text));
}
