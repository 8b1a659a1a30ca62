
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};

use iv_screener::analytics::calendar::CalendarRow;
use iv_screener::analytics::vol::VolRow;
use iv_screener::api::error::ApiError;
use iv_screener::api::handlers::{admin, screener};
use iv_screener::api::state::AppState;
use iv_screener::api::types::{
    CalendarThresholdsRequest, IntervalRequest, LoginRequest, SkewBenchmarkRequest, VolBenchmarkRequest,
};
use iv_screener::data::csv_types::SkewBenchmarkRow;
use iv_screener::data::load_csv;
use iv_screener::gateway::auth::CredentialStore;
use iv_screener::run::scheduler::TickScheduler;

use screener_common::*;

const BUDGET: Duration = Duration::from_secs(1);

fn app(h: &Harness) -> AppState {
    let (_scheduler, handle) = TickScheduler::new(Duration::from_secs(1));
    let credentials = CredentialStore::new(&h.dir.path().join("auth"));
    AppState::new(&h.screener, credentials, handle)
}

fn vol_request(ticker: &str, bucket: &str, benchmark: Option<f64>) -> VolBenchmarkRequest {
    VolBenchmarkRequest {
        ticker: ticker.into(),
        bucket: bucket.into(),
        benchmark,
        change_pct: None,
    }
}

// ── Tick interval ────────────────────────────────────────────────────

#[tokio::test]
async fn interval_change_reaches_scheduler() {
    let h = harness();
    let state = app(&h);

    let result = admin::set_interval(State(state.clone()), Json(IntervalRequest { interval_ms: 250 })).await;
    let Ok(Json(resp)) = result else {
        panic!("interval change rejected");
    };
    assert_eq!(resp.interval_ms, 250);
    assert_eq!(*state.inner.interval.borrow(), Duration::from_millis(250));

    let result = admin::set_interval(State(state.clone()), Json(IntervalRequest { interval_ms: 0 })).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
    assert_eq!(*state.inner.interval.borrow(), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn scheduler_follows_new_interval() {
    let (mut scheduler, handle) = TickScheduler::new(Duration::from_secs(5));
    scheduler.wait_for_next().await;
    handle.send_replace(Duration::from_millis(250));
    scheduler.wait_for_next().await;
    assert_eq!(scheduler.period(), Duration::from_millis(250));
}

// ── Calendar thresholds ──────────────────────────────────────────────

#[tokio::test]
async fn calendar_thresholds_resplit_immediately() {
    let h = harness();
    h.gateway.set_atm_iv(Some(vec![atm("ABC", 101.0, 1.0, 0.10), atm("XYZ", 100.0, 0.5, 0.50)]));
    h.gateway.set_token_set(Some(token_set()));
    h.screener.tick(BUDGET).await;
    assert_eq!(h.store().read::<CalendarRow>("calendar.near_low_pos").len(), 1);

    let state = app(&h);
    let req = CalendarThresholdsRequest {
        low_ivp: Some(5.0),
        high_ivp: None,
    };
    let Ok(Json(resp)) = admin::set_calendar_thresholds(State(state.clone()), Json(req)).await else {
        panic!("threshold change rejected");
    };
    assert_eq!(resp.low_ivp, 5.0);
    assert_eq!(resp.high_ivp, 80.0);
    assert_eq!(h.screener.config.snapshot().cal_low_ivp_limit, 5.0);
    assert!(h.store().read::<CalendarRow>("calendar.near_low_pos").is_empty());

    // Low above high fails validation and leaves the config alone.
    let req = CalendarThresholdsRequest {
        low_ivp: Some(90.0),
        high_ivp: None,
    };
    let result = admin::set_calendar_thresholds(State(state.clone()), Json(req)).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
    assert_eq!(h.screener.config.snapshot().cal_low_ivp_limit, 5.0);

    let req = CalendarThresholdsRequest {
        low_ivp: None,
        high_ivp: Some(150.0),
    };
    let result = admin::set_calendar_thresholds(State(state), Json(req)).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

// ── Benchmark overrides ──────────────────────────────────────────────

#[tokio::test]
async fn vol_override_validates_bucket_and_ticker() {
    let h = harness();
    let state = app(&h);

    let result = admin::override_vol_benchmark(State(state.clone()), Json(vol_request("ABC", "near", Some(0.5)))).await;
    assert!(result.is_ok());
    let near = h.store().read::<VolRow>("vol.near");
    let abc = near.iter().find(|r| r.symbol == "ABC").unwrap();
    assert_eq!(abc.vol_benchmark, 0.5);
    assert_eq!(abc.vol_benchmark_prev, 0.3);

    let result = admin::override_vol_benchmark(State(state.clone()), Json(vol_request("ABC", "far", Some(0.5)))).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));

    let result = admin::override_vol_benchmark(State(state.clone()), Json(vol_request("NOPE", "near", Some(0.5)))).await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));

    let result = admin::override_vol_benchmark(State(state), Json(vol_request("ABC", "weekly", Some(0.5)))).await;
    assert!(matches!(result, Err(ApiError::BadRequest(_))));
}

#[tokio::test]
async fn skew_override_is_persisted() {
    let h = harness();
    let state = app(&h);

    let req = SkewBenchmarkRequest {
        ticker: "ABC".into(),
        bucket: "next".into(),
        ppf: Some(9.5),
        pcf: None,
        ccb: None,
        four_leg_f: None,
    };
    assert!(admin::override_skew_benchmark(State(state.clone()), Json(req)).await.is_ok());

    let on_disk: Vec<SkewBenchmarkRow> = load_csv(h.dir.path(), "skew_expiry_2.csv").unwrap();
    assert_eq!(on_disk[0].ppf, Some(9.5));
    assert_eq!(on_disk[0].pcf, Some(2.0));
    let untouched: Vec<SkewBenchmarkRow> = load_csv(h.dir.path(), "skew_expiry_1.csv").unwrap();
    assert_eq!(untouched[0].ppf, Some(1.0));

    let req = SkewBenchmarkRequest {
        ticker: "NOPE".into(),
        bucket: "near".into(),
        ppf: Some(1.0),
        pcf: None,
        ccb: None,
        four_leg_f: None,
    };
    let result = admin::override_skew_benchmark(State(state), Json(req)).await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));
}

// ── Login ────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_persists_only_verified_credentials() {
    let h = harness();
    let state = app(&h);

    let bad = LoginRequest {
        username: "ops".into(),
        password: "wrong".into(),
    };
    let result = admin::login(State(state.clone()), Json(bad)).await;
    assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    let Json(status) = admin::is_logged_in(State(state.clone())).await;
    assert!(!status.logged_in);
    assert_eq!(h.gateway.auth_resets.load(Ordering::SeqCst), 0);

    let good = LoginRequest {
        username: "ops".into(),
        password: "secret".into(),
    };
    assert!(admin::login(State(state.clone()), Json(good)).await.is_ok());
    let Json(status) = admin::is_logged_in(State(state)).await;
    assert!(status.logged_in);
    assert_eq!(status.username.as_deref(), Some("ops"));
    assert_eq!(h.gateway.auth_resets.load(Ordering::SeqCst), 1);
    assert!(h.dir.path().join("auth").join("secret.json").exists());
}

// ── Queries ──────────────────────────────────────────────────────────

#[tokio::test]
async fn tables_are_queryable_by_name() {
    let h = harness();
    h.gateway.set_atm_iv(Some(vec![atm("ABC", 101.0, 1.0, 0.10)]));
    h.screener.tick(BUDGET).await;
    let state = app(&h);

    let Json(tables) = screener::list_tables(State(state.clone())).await;
    let near = tables.iter().find(|t| t.name == "atm_iv.near").unwrap();
    assert_eq!(near.rows, 1);

    let Ok(Json(records)) = screener::get_table(State(state.clone()), Path("atm_iv.near".to_string())).await else {
        panic!("atm_iv.near missing");
    };
    assert_eq!(records[0]["symbol"], "ABC");
    assert_eq!(records[0]["ltp"], 101.0);

    let result = screener::get_table(State(state.clone()), Path("nope".to_string())).await;
    assert!(matches!(result, Err(ApiError::NotFound(_))));

    assert!(screener::get_metadata(State(state.clone())).await.is_ok());

    let Json(expiries) = admin::expiries(State(state)).await;
    assert_eq!(expiries.near, d(3, 28));
    assert_eq!(expiries.far, d(5, 30));
}
