use std::str::FromStr as _;
use std::time::Duration;

use crate::code::ShortCodeError;
use crate::{PartyId, SessionId, ShortCode, Timestamp};

#[test]
fn id_roundtrip() {
    let id = SessionId::generate();
    let s = id.to_string();
    assert_eq!(SessionId::from_str(&s).unwrap(), id);

    let id = PartyId::generate();
    assert_eq!(PartyId::from_str(&id.to_string()).unwrap(), id);
}

#[test]
fn id_serde_as_string() {
    let id = PartyId::from_bytes([7; 16]);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    assert_eq!(serde_json::from_str::<PartyId>(&json).unwrap(), id);
}

#[test]
fn short_code_parse() {
    let code = ShortCode::from_str("abc234").unwrap();
    assert_eq!(code.to_string(), "ABC234");

    assert_eq!(ShortCode::from_str("ABC23"), Err(ShortCodeError::Length));
    assert_eq!(ShortCode::from_str("ABC10X"), Err(ShortCodeError::Alphabet));
    // O and I are excluded from the alphabet
    assert_eq!(ShortCode::from_str("OOOOOO"), Err(ShortCodeError::Alphabet));
}

#[test]
fn short_code_generate_stays_in_alphabet() {
    for _ in 0..100 {
        let code = ShortCode::generate();
        assert!(ShortCode::from_str(code.as_str()).is_ok());
    }
}

#[test]
fn timestamp_math() {
    let t = Timestamp::from_millis(10_000);
    let later = t.saturating_add(Duration::from_secs(2));
    assert_eq!(later.as_millis(), 12_000);

    assert_eq!(later.saturating_since(t), Duration::from_secs(2));
    assert_eq!(t.saturating_since(later), Duration::ZERO);

    assert_eq!(
        later.remaining_from(t),
        Some(Duration::from_secs(2)),
    );
    assert_eq!(later.remaining_from(later), None);
}
