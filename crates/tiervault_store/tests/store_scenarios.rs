//! End-to-end scenarios against an on-disk store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tiervault_store::{
    DrawOutcome, DrawRejection, ManualClock, PoolId, RegisterOutcome, Store, StoreOptions, Tier,
};

fn temp_dir(tag: &str) -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("tiervault_{tag}_{id}"))
}

fn wednesday_noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 6)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn open(dir: &Path, clock: &Arc<ManualClock>) -> Store {
    StoreOptions::new(dir)
        .with_seed(99)
        .with_clock(clock.clone())
        .open()
        .unwrap()
}

#[test]
fn test_registration_sequence() {
    let dir = temp_dir("registration");
    let store = Store::open_in(&dir).unwrap();
    store.add_registration_codes(["A", "B"]).unwrap();

    assert_eq!(
        store.register("u1", false).unwrap(),
        RegisterOutcome::Registered { code: "A".into() }
    );
    let before = store.pool_counts();
    let again = store.register("u1", false).unwrap();
    assert_eq!(again.reason(), "already_registered");
    assert_eq!(again.code(), Some("A"));
    assert_eq!(store.pool_counts(), before);

    assert_eq!(store.register("u2", false).unwrap().code(), Some("B"));
    assert_eq!(store.register("u3", false).unwrap(), RegisterOutcome::NoStock);

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_weekly_limit_resets_on_monday() {
    let dir = temp_dir("weekly");
    let clock = Arc::new(ManualClock::new(wednesday_noon()));
    let store = open(&dir, &clock);
    store
        .add_lottery_codes(Tier::Blue, ["B1", "B2", "B3"])
        .unwrap();
    assert_eq!(store.lottery_config().weekly_limit, 1);

    assert!(store.draw_lottery("u1", false).unwrap().is_success());
    assert_eq!(
        store.draw_lottery("u1", false).unwrap(),
        DrawOutcome::Rejected(DrawRejection::WeeklyLimitReached)
    );

    // Sunday night is still the same ISO week
    clock.set(wednesday_noon() + Duration::days(4) + Duration::hours(11));
    assert!(!store.can_draw("u1").is_allowed());

    // Monday 00:00
    clock.set(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap().and_hms_opt(0, 0, 0).unwrap());
    assert!(store.can_draw("u1").is_allowed());
    assert!(store.draw_lottery("u1", false).unwrap().is_success());

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_concurrent_draws_never_over_issue() {
    let dir = temp_dir("concurrent");
    let store = Arc::new(StoreOptions::new(&dir).with_seed(5).open().unwrap());
    let codes: Vec<String> = (0..20).map(|i| format!("BLUE-{i:04}")).collect();
    store.add_lottery_codes(Tier::Blue, &codes).unwrap();

    let threads = 50;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.draw_lottery(&format!("user-{t}"), false).unwrap())
        })
        .collect();

    let outcomes: Vec<DrawOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let won: Vec<&str> = outcomes.iter().filter_map(DrawOutcome::code).collect();
    let empty = outcomes
        .iter()
        .filter(|o| **o == DrawOutcome::Rejected(DrawRejection::PoolEmpty))
        .count();

    assert_eq!(won.len(), codes.len());
    assert_eq!(empty, threads - codes.len());
    let distinct: HashSet<&str> = won.iter().copied().collect();
    assert_eq!(distinct.len(), won.len());
    assert_eq!(store.pool_counts().get(Tier::Blue), 0);

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_concurrent_registration_is_at_most_once() {
    let dir = temp_dir("concurrent_reg");
    let store = Arc::new(StoreOptions::new(&dir).with_seed(5).open().unwrap());
    store.add_registration_codes(["R1", "R2", "R3"]).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.register("same-user", false).unwrap())
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(RegisterOutcome::is_success)
        .count();

    assert_eq!(successes, 1);
    assert_eq!(store.snapshot().registration_codes.available(), 2);

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_pity_monotonicity() {
    let dir = temp_dir("pity");
    let clock = Arc::new(ManualClock::new(wednesday_noon()));
    let store = open(&dir, &clock);
    store
        .transaction(|tx| {
            tx.update_lottery_config(tiervault_store::ConfigChange::WeeklyLimit(0));
            tx.update_lottery_config(tiervault_store::ConfigChange::PityThreshold(4));
        })
        .unwrap();

    let blues: Vec<String> = (0..40).map(|i| format!("B{i}")).collect();
    store.add_lottery_codes(Tier::Blue, &blues).unwrap();
    store.add_lottery_codes(Tier::Purple, ["P1", "P2", "P3"]).unwrap();

    let mut consecutive_blue = 0;
    for _ in 0..30 {
        let before = store.user_lottery_data("u1").pity_count;
        let outcome = store.draw_lottery("u1", false).unwrap();
        let DrawOutcome::Won { tier, pity_triggered, .. } = outcome else {
            break;
        };
        if pity_triggered {
            assert!(before >= 4);
            assert_ne!(tier, Tier::Blue);
        }
        if tier == Tier::Blue {
            consecutive_blue += 1;
            assert_eq!(store.user_lottery_data("u1").pity_count, before + 1);
        } else {
            consecutive_blue = 0;
            assert_eq!(store.user_lottery_data("u1").pity_count, 0);
        }
        assert!(consecutive_blue <= 4);
    }

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_global_uniqueness_across_operations() {
    let dir = temp_dir("unique");
    let store = Store::open_in(&dir).unwrap();

    store.add_registration_codes(["C1", "C2"]).unwrap();
    let report = store.add_lottery_codes(Tier::Gold, ["C2", "C3"]).unwrap();
    assert_eq!((report.added, report.skipped), (1, 1));
    store.register("u1", false).unwrap();
    assert_eq!(store.add_event_codes(["C1", "C4"]).unwrap().skipped, 1);
    store.reset_user_registration("u1").unwrap();
    assert_eq!(store.add_registration_codes(["C1"]).unwrap().skipped, 1);

    let state = store.snapshot();
    let mut seen = HashSet::new();
    for id in PoolId::ALL {
        let pool = state.pool(id);
        for code in pool.unused().chain(pool.used().map(|(c, _)| c)) {
            assert!(seen.insert(code.to_string()), "{code} appears twice");
        }
    }

    drop(store);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_draw_log_in_one_transaction() {
    let dir = temp_dir("draw_log");
    let store = Store::open_in(&dir).unwrap();
    store.add_lottery_codes(Tier::Gold, ["GOLD-1"]).unwrap();

    let outcome = store
        .transaction(|tx| {
            let outcome = tx.draw_lottery("u1", false);
            if let Some(tier) = outcome.tier() {
                tx.log_action("draw", "u1", &format!("won {tier}"));
            }
            outcome
        })
        .unwrap();
    assert_eq!(outcome.tier(), Some(Tier::Gold));

    let reopened = Store::open_in(&dir).unwrap();
    assert_eq!(reopened.logs(10)[0].detail, "won gold");
    assert_eq!(reopened.lottery_history(10)[0].code_hash, "GOLD****");

    drop((store, reopened));
    std::fs::remove_dir_all(&dir).ok();
}
