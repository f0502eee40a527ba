//! Integration tests: ingest events, then query them back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollupdb_core::query::QueryExecutor;
use rollupdb_core::{
    BreakdownDef, Catalog, EngineConfig, Error, ExtraAggregation, FilterDef, Ingestor, Interval,
    MemoryStore, QueryEngine, QueryFilter, QueryRequest, RangeQuery, RangeStore, SledStore,
    StorageConfig,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const HOUR: i64 = 3_600_000;
// 2015-11-16T11:00:00Z
const BASE: i64 = 1447671600000;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(BASE + 3 * HOUR - 1).unwrap()
}

fn config() -> EngineConfig {
    let catalog = Catalog::new(vec![
        BreakdownDef::new("global_metrics")
            .with_filter(FilterDef::new("country").with_property("ip_geo_info.country")),
        BreakdownDef::new("publisher_metrics")
            .with_dimensions(["unit_domain", "unit_environment"])
            .with_filter(FilterDef::new("country").with_property("ip_geo_info.country"))
            .with_filter(
                FilterDef::new("device_browser")
                    .with_properties(["user_agent_device", "user_agent_browser"]),
            ),
    ])
    .unwrap();
    EngineConfig::new(catalog)
        .with_extra_aggregation(ExtraAggregation::new("load_time_ms", "load_time"))
}

fn event(domain: &str, country: &str, device: &str) -> Value {
    json!({
        "event_name": "UnitFirstLoad",
        "unit_domain": domain,
        "unit_environment": "PRODUCTION",
        "ip_geo_info": {"country": country},
        "user_agent_device": device,
        "user_agent_browser": "firefox",
        "load_time_ms": 100
    })
}

/// Five events in hour 11, nine in hour 12, two in hour 13 for foo.com,
/// plus noise for another domain.
async fn load<S: RangeStore>(ingestor: &Ingestor<S>) {
    let schedule: [(i64, usize, &str); 3] = [(0, 5, "US"), (1, 9, "US"), (2, 2, "DE")];
    for (hour, count, country) in schedule {
        for i in 0..count {
            let ts = BASE + hour * HOUR + i as i64 * 1000;
            let device = if i % 2 == 0 { "mobile" } else { "desktop" };
            ingestor.record(&event("foo.com", country, device), ts).await.unwrap();
        }
    }
    ingestor.record(&event("bar.com", "US", "mobile"), BASE).await.unwrap();
}

fn foo_request() -> QueryRequest {
    QueryRequest::new("UnitFirstLoad", "this_24_hours")
        .with_filter(QueryFilter::eq("unit_domain", "foo.com"))
        .with_filter(QueryFilter::eq("unit_environment", "PRODUCTION"))
}

async fn run<S: RangeStore>(engine: &QueryEngine<S>, request: &QueryRequest) -> Value {
    let response = engine
        .execute_at(request, now(), &CancellationToken::new())
        .await
        .unwrap();
    serde_json::to_value(response).unwrap()
}

async fn check_queries<S: RangeStore>(engine: &QueryEngine<S>) {
    let total = run(engine, &foo_request()).await;
    assert_eq!(total["result"], json!(16));
    assert_eq!(total["timeframe"], json!({"start": "2015-11-15T14:00:00.000Z"}));

    let hourly = run(engine, &foo_request().with_interval(Interval::Hourly)).await;
    assert_eq!(
        hourly["result"],
        json!([
            {"timeframe": {"start": "2015-11-16T11:00:00.000Z", "end": "2015-11-16T12:00:00.000Z"}, "value": 5},
            {"timeframe": {"start": "2015-11-16T12:00:00.000Z", "end": "2015-11-16T13:00:00.000Z"}, "value": 9},
            {"timeframe": {"start": "2015-11-16T13:00:00.000Z", "end": "2015-11-16T14:00:00.000Z"}, "value": 2}
        ])
    );

    let daily = run(engine, &foo_request().with_interval(Interval::Daily)).await;
    assert_eq!(
        daily["result"],
        json!([
            {"timeframe": {"start": "2015-11-16T00:00:00.000Z", "end": "2015-11-17T00:00:00.000Z"}, "value": 16}
        ])
    );

    let us_only = foo_request().with_filter(QueryFilter::eq("ip_geo_info.country", "US"));
    assert_eq!(run(engine, &us_only).await["result"], json!(14));

    let by_country = foo_request().with_group_by("ip_geo_info.country");
    assert_eq!(
        run(engine, &by_country).await["result"],
        json!([
            {"ip_geo_info.country": "US", "result": 14},
            {"ip_geo_info.country": "DE", "result": 2}
        ])
    );

    // Desktop events: 2 in hour 11, 4 in hour 12, 1 in hour 13.
    let not_mobile = foo_request()
        .with_filter(QueryFilter::ne("user_agent_device", "mobile"))
        .with_group_by("user_agent_browser");
    assert_eq!(
        run(engine, &not_mobile).await["result"],
        json!([{"user_agent_browser": "firefox", "result": 7}])
    );

    let global = QueryRequest::new("UnitFirstLoad", "this_1_day");
    assert_eq!(run(engine, &global).await["result"], json!(17));

    let load_time = foo_request().with_metric("load_time");
    assert_eq!(run(engine, &load_time).await["result"], json!(1600));

    let before = QueryRequest::new("UnitFirstLoad", "prev_1_day");
    assert_eq!(run(engine, &before).await["result"], json!(0));
}

#[tokio::test]
async fn test_memory_store_end_to_end() {
    let config = Arc::new(config());
    let store = Arc::new(MemoryStore::with_page_size(1));
    let ingestor = Ingestor::new(Arc::clone(&config), Arc::clone(&store));
    load(&ingestor).await;

    check_queries(&QueryEngine::new(config, store)).await;
}

#[tokio::test]
async fn test_sled_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config());
    let store =
        Arc::new(SledStore::open(StorageConfig::new(dir.path()).with_page_size(2)).unwrap());
    let ingestor = Ingestor::new(Arc::clone(&config), Arc::clone(&store));
    load(&ingestor).await;

    let mut tables = store.table_names();
    tables.sort();
    assert_eq!(tables, vec!["global_metrics_hourly", "publisher_metrics_hourly"]);

    check_queries(&QueryEngine::new(config, store)).await;
}

#[tokio::test]
async fn test_sled_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config());
    {
        let store = Arc::new(SledStore::open(StorageConfig::new(dir.path())).unwrap());
        let ingestor = Ingestor::new(Arc::clone(&config), Arc::clone(&store));
        load(&ingestor).await;
        store.flush().await.unwrap();
    }

    let store = Arc::new(SledStore::open(StorageConfig::new(dir.path())).unwrap());
    assert!(store.was_recovered());
    let engine = QueryEngine::new(config, store);
    assert_eq!(run(&engine, &foo_request()).await["result"], json!(16));
}

#[tokio::test]
async fn test_executor_pages_through_sled() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config());
    let store =
        Arc::new(SledStore::open(StorageConfig::new(dir.path()).with_page_size(1)).unwrap());
    let ingestor = Ingestor::new(Arc::clone(&config), Arc::clone(&store));
    load(&ingestor).await;

    let query = RangeQuery::new(
        "publisher_metrics_hourly",
        "foo.com|PRODUCTION|UnitFirstLoad_all_count",
        BASE,
        None,
    );
    let mut timestamps = Vec::new();
    let stats = QueryExecutor::new(store.as_ref())
        .scan(&query, &CancellationToken::new(), |rows| {
            timestamps.extend(rows.iter().map(|r| r.timestamp));
        })
        .await
        .unwrap();

    assert_eq!(timestamps, vec![BASE, BASE + HOUR, BASE + 2 * HOUR]);
    assert_eq!(stats.rows, 3);
}

#[tokio::test]
async fn test_cancelled_query_returns_cancelled() {
    let config = Arc::new(config());
    let store = Arc::new(MemoryStore::new());
    let engine = QueryEngine::new(config, store);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine
        .execute_at(&foo_request(), now(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn test_unanswerable_query() {
    let engine = QueryEngine::new(Arc::new(config()), Arc::new(MemoryStore::new()));
    let request = foo_request().with_group_by("referrer");
    let err = engine
        .execute_at(&request, now(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "A source for this request could not be found.");
}
