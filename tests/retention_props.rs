use std::collections::HashSet;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use clipkeeper::clipboard::ContentKind;
use clipkeeper::db::retention::RetentionCandidate;
use clipkeeper::db::{HistoryFilter, HistoryStore, RetentionPolicy};

fn candidates_from(offsets: &[i64]) -> Vec<RetentionCandidate> {
    let base = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("valid date");
    offsets
        .iter()
        .enumerate()
        .map(|(i, offset)| RetentionCandidate {
            id: i as i64 + 1,
            created_at: base + Duration::minutes(*offset),
        })
        .collect()
}

proptest! {
    #[test]
    fn count_cap_leaves_exactly_max_items_and_evicts_only_older_rows(
        offsets in prop::collection::vec(0_i64..10_000, 0..60),
        max_items in 1_usize..30,
    ) {
        let candidates = candidates_from(&offsets);
        let policy = RetentionPolicy::new(max_items, 0);
        let evicted: HashSet<i64> = policy
            .select_evictions(&candidates, Utc::now())
            .into_iter()
            .collect();

        let survivors: Vec<&RetentionCandidate> =
            candidates.iter().filter(|c| !evicted.contains(&c.id)).collect();
        prop_assert_eq!(survivors.len(), candidates.len().min(max_items));

        for gone in candidates.iter().filter(|c| evicted.contains(&c.id)) {
            for kept in &survivors {
                prop_assert!((gone.created_at, gone.id) < (kept.created_at, kept.id));
            }
        }
    }

    #[test]
    fn eviction_result_is_independent_of_input_order(
        offsets in prop::collection::vec(0_i64..5_000, 1..40),
        max_items in 1_usize..20,
        days in 0_i64..3,
    ) {
        let candidates = candidates_from(&offsets);
        let mut reversed = candidates.clone();
        reversed.reverse();
        let now = Utc.with_ymd_and_hms(2026, 6, 3, 12, 0, 0).single().expect("valid date");

        let policy = RetentionPolicy::new(max_items, days);
        prop_assert_eq!(
            policy.select_evictions(&candidates, now),
            policy.select_evictions(&reversed, now)
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn favorites_survive_any_number_of_inserts(
        max_items in 1_usize..5,
        favorite_slots in prop::collection::vec(any::<bool>(), 1..8),
        extra_inserts in 1_usize..12,
    ) {
        let store = HistoryStore::open_in_memory().expect("open store");
        store.set_retention_policy(RetentionPolicy::new(1000, 0)).expect("relaxed policy");

        let start = Utc::now() - Duration::minutes(30);
        let mut favorites = Vec::new();
        for (i, is_favorite) in favorite_slots.iter().enumerate() {
            let id = store
                .insert(ContentKind::Text, format!("seed-{i}").as_bytes(), start + Duration::seconds(i as i64))
                .expect("insert seed");
            if *is_favorite {
                store.toggle_favorite(id).expect("favorite");
                favorites.push(id);
            }
        }

        store.set_retention_policy(RetentionPolicy::new(max_items, 1)).expect("strict policy");
        for i in 0..extra_inserts {
            store
                .insert(ContentKind::Text, format!("new-{i}").as_bytes(), Utc::now())
                .expect("insert");
        }

        for id in &favorites {
            prop_assert!(store.get(*id).expect("favorite survives").favorite);
        }

        let all = store.query(&HistoryFilter::default(), None, 0).expect("query");
        let non_favorites = all.iter().filter(|item| !item.favorite).count();
        prop_assert!(non_favorites <= max_items);
        prop_assert_eq!(all.len() - non_favorites, favorites.len());
    }
}
