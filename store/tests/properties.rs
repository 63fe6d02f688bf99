//! Cross-structure invariants exercised through the public store API.

use std::collections::HashMap;
use store::{MAX_EXPIRE_BATCH, Store};

/// Deterministic walk through the key space; 2^16+1 is coprime with the
/// modulus so the sequence cycles through every value.
fn scramble(i: u64) -> u64 {
    (i.wrapping_mul(65_537) + 11) % 8_192
}

#[test]
fn store_tracks_a_model_under_churn() {
    let mut store = Store::new();
    let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

    for round in 0u64..20_000 {
        let key = format!("key-{}", scramble(round)).into_bytes();
        match round % 5 {
            // Mostly writes, some deletes, some reads.
            0 | 1 | 2 => {
                let value = format!("value-{round}").into_bytes();
                store.set(&key, &value).unwrap();
                model.insert(key, value);
            }
            3 => {
                let expected = model.remove(&key).is_some();
                assert_eq!(store.del(&key), expected);
            }
            _ => {
                let got = store.get(&key).unwrap().map(<[u8]>::to_vec);
                assert_eq!(got, model.get(&key).cloned());
            }
        }
        assert_eq!(store.len(), model.len());
    }

    // Every surviving key reads back; scan agrees with the model.
    for (key, value) in &model {
        assert_eq!(store.get(key).unwrap(), Some(value.as_slice()));
    }
    let mut scanned = 0;
    store.scan(|_, _| scanned += 1);
    assert_eq!(scanned, model.len());
}

#[test]
fn zquery_yields_ascending_score_name_order() {
    let mut store = Store::new();
    for i in 0u64..2_000 {
        let name = format!("member-{}", scramble(i));
        let score = (scramble(i * 31) % 100) as f64 / 4.0;
        store.zadd(b"board", name.as_bytes(), score).unwrap();
    }

    let members = store
        .zquery(b"board", f64::NEG_INFINITY, b"", 0, usize::MAX)
        .unwrap();
    assert!(!members.is_empty());
    for pair in members.windows(2) {
        let (name_a, score_a) = (pair[0].0, pair[0].1);
        let (name_b, score_b) = (pair[1].0, pair[1].1);
        assert!(
            score_a < score_b || (score_a == score_b && name_a < name_b),
            "members out of order: ({score_a}, {name_a:?}) then ({score_b}, {name_b:?})"
        );
    }

    // Rank offsets agree with the full listing.
    let full: Vec<(Vec<u8>, f64)> = members
        .iter()
        .map(|&(name, score)| (name.to_vec(), score))
        .collect();
    let window = store
        .zquery(b"board", f64::NEG_INFINITY, b"", 100, 50)
        .unwrap();
    for (i, &(name, score)) in window.iter().enumerate() {
        assert_eq!((name.to_vec(), score), full[100 + i]);
    }
}

#[test]
fn ttl_is_monotonic_and_expiry_is_final() {
    let mut store = Store::new();
    store.set(b"x", b"hello").unwrap();

    let now = 10_000;
    assert!(store.expire(b"x", 100, now));
    let remaining = store.ttl(b"x", now + 30);
    assert!((0..=100).contains(&remaining), "ttl {remaining} out of range");

    // Nothing due before the deadline.
    assert_eq!(store.expire_due(now + 99, MAX_EXPIRE_BATCH), 0);
    assert_eq!(store.expire_due(now + 100, MAX_EXPIRE_BATCH), 1);
    assert_eq!(store.get(b"x").unwrap(), None);
    assert_eq!(store.ttl(b"x", now + 100), -2);
}

#[test]
fn expired_keys_free_their_slots_for_reuse() {
    let mut store = Store::new();
    for i in 0..1_000u32 {
        let key = format!("gone-{i}");
        store.set(key.as_bytes(), b"v").unwrap();
        store.expire(key.as_bytes(), 1, 0);
    }
    assert_eq!(store.expire_due(10, MAX_EXPIRE_BATCH), 1_000);
    assert!(store.is_empty());

    for i in 0..1_000u32 {
        let key = format!("kept-{i}");
        store.set(key.as_bytes(), b"v").unwrap();
    }
    assert_eq!(store.len(), 1_000);
    assert_eq!(store.get(b"kept-999").unwrap(), Some(&b"v"[..]));
}
