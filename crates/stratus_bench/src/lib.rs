//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;
use stratus_codec::{Row, DEFAULT_PRIMARY_KEY};
use stratus_protocol::ChangeEvent;

const STATUSES: [&str; 3] = ["draft", "published", "archived"];

/// A random post as JSON.
pub fn random_post(id: i64, rng: &mut impl Rng) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "title": format!("post {}", id),
        "status": STATUSES[rng.gen_range(0..STATUSES.len())],
        "author": rng.gen_range(0..50),
        "created_at": rng.gen_range(0..1_000_000i64),
    })
}

/// Generate `count` random posts with identifiers `0..count`.
pub fn generate_posts(count: usize) -> Vec<Row> {
    let mut rng = rand::thread_rng();
    (0..count as i64)
        .map(|id| {
            Row::from_json(DEFAULT_PRIMARY_KEY, &random_post(id, &mut rng))
                .expect("generated post is keyed")
        })
        .collect()
}

/// Generate a change stream over identifiers `0..id_space`, with
/// sequences starting at 1.
pub fn generate_events(count: usize, id_space: i64) -> Vec<ChangeEvent> {
    let mut rng = rand::thread_rng();
    (1..=count as u64)
        .map(|sequence| {
            let id = rng.gen_range(0..id_space);
            match rng.gen_range(0..10) {
                0..=3 => {
                    let row = Row::from_json(DEFAULT_PRIMARY_KEY, &random_post(id, &mut rng))
                        .expect("generated post is keyed");
                    ChangeEvent::inserted("posts", row, sequence, 0)
                }
                4..=7 => {
                    let row = Row::from_json(DEFAULT_PRIMARY_KEY, &random_post(id, &mut rng))
                        .expect("generated post is keyed");
                    ChangeEvent::updated("posts", row, sequence, 0)
                }
                _ => ChangeEvent::deleted("posts", id, sequence, 0),
            }
        })
        .collect()
}
