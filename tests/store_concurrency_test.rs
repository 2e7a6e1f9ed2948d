//! Concurrent writers and readers on one pair file

use chrono::{Duration, NaiveDate};
use rusty_fx::currency::CurrencyPair;
use rusty_fx::data::RateStore;
use rusty_fx::types::RatePoint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tempfile::TempDir;

const WRITERS: usize = 4;
const BATCH: usize = 25;

fn usd_eur() -> CurrencyPair {
    CurrencyPair::from_codes("USD", "EUR").unwrap()
}

fn batch(writer: usize) -> Vec<RatePoint> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..BATCH)
        .map(|i| {
            let offset = (writer * BATCH + i) as i64;
            RatePoint::new(start + Duration::days(offset), 0.9 + writer as f64 / 100.0)
        })
        .collect()
}

#[test]
fn test_concurrent_merges_keep_every_batch() {
    let dir = TempDir::new().unwrap();
    let store = RateStore::open(dir.path()).unwrap();
    let pair = usd_eur();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut reads = 0usize;
            while !done.load(Ordering::Acquire) {
                let series = store.try_load(&pair).expect("reader saw a partial file");
                assert_eq!(series.len() % BATCH, 0);
                reads += 1;
            }
            reads
        });

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = &store;
                let pair = &pair;
                s.spawn(move || store.merge(pair, batch(w)).unwrap())
            })
            .collect();
        for writer in writers {
            let summary = writer.join().unwrap();
            assert_eq!(summary.inserted, BATCH);
        }

        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);
    });

    let series = store.try_load(&pair).unwrap();
    assert_eq!(series.len(), WRITERS * BATCH);
    for w in 0..WRITERS {
        for point in batch(w) {
            assert!(series.contains_date(point.date));
        }
    }
}
