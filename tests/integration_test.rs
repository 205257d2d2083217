use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Spawn the server on a random port and return the address.
async fn spawn_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    // Create temp db
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();
    // Keep tmp alive by leaking it (test only)
    std::mem::forget(tmp);

    let pool = {
        let cfg = deadpool_sqlite::Config::new(&db_path);
        cfg.create_pool(deadpool_sqlite::Runtime::Tokio1).unwrap()
    };

    // Init DB with all migrations
    {
        let conn = pool.get().await.unwrap();
        conn.interact(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )
            .unwrap();
            epitrack::storage::migrations::run_migrations(conn).unwrap();
        })
        .await
        .unwrap();
    }

    let records_pool = Arc::new(pool.clone());
    let analytics_state = Arc::new(epitrack::analytics::AnalyticsState::new(
        pool.clone(),
        epitrack::config::AnalyticsConfig::default(),
    ));

    use axum::routing::get;
    use axum::Router;
    use epitrack::analytics::handler as analytics_handler;
    use epitrack::records::handler as records_handler;

    let record_routes = Router::new()
        .route("/health", get(records_handler::health))
        .route(
            "/api/historical-data",
            get(records_handler::list_records).post(records_handler::create_record),
        )
        .route(
            "/api/historical-data/filter",
            get(records_handler::filter_records),
        )
        .route(
            "/api/historical-data/country/{iso_code}",
            get(records_handler::country_records),
        )
        .route(
            "/api/historical-data/{id}",
            get(records_handler::get_record)
                .put(records_handler::update_record)
                .delete(records_handler::delete_record),
        )
        .with_state(records_pool);

    let analytics_routes = Router::new()
        .route(
            "/api/historical-data/aggregation",
            get(analytics_handler::aggregation),
        )
        .route("/api/historical-data/stats", get(analytics_handler::stats))
        .route("/api/historical-data/rt", get(analytics_handler::rt))
        .route(
            "/api/historical-data/mortality-rate",
            get(analytics_handler::mortality_rate),
        )
        .route(
            "/api/historical-data/geographic-spread",
            get(analytics_handler::geographic_spread),
        )
        .route(
            "/api/historical-data/ml-ready",
            get(analytics_handler::ml_ready),
        )
        .with_state(analytics_state);

    let app = Router::new().merge(record_routes).merge(analytics_routes);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server a moment to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, handle)
}

/// Insert one observation through the API and return its id.
async fn seed(
    client: &reqwest::Client,
    addr: SocketAddr,
    date: &str,
    country: &str,
    iso_code: &str,
    indicator: &str,
    value: f64,
) -> i64 {
    let resp = client
        .post(format!("http://{addr}/api/historical-data"))
        .json(&serde_json::json!({
            "date": date,
            "country": country,
            "iso_code": iso_code,
            "indicator": indicator,
            "source": "covid",
            "value": value,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_ok"], true);
}

#[tokio::test]
async fn test_crud_roundtrip() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let id = seed(&client, addr, "2024-01-01", "France", "FRA", "cases", 120.0).await;

    // Read it back
    let resp = client
        .get(format!("http://{addr}/api/historical-data/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let record: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(record["country"], "France");
    assert_eq!(record["iso_code"], "FRA");
    assert_eq!(record["value"], 120.0);

    // Partial update: only the value changes
    let resp = client
        .put(format!("http://{addr}/api/historical-data/{id}"))
        .json(&serde_json::json!({ "value": 150.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(updated["value"], 150.0);
    assert_eq!(updated["country"], "France");

    // Listing includes it
    let resp = client
        .get(format!("http://{addr}/api/historical-data"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"][0]["id"], id);

    // Delete, then every path 404s
    let resp = client
        .delete(format!("http://{addr}/api/historical-data/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client
        .get(format!("http://{addr}/api/historical-data/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no historical record"));

    let resp = client
        .put(format!("http://{addr}/api/historical-data/{id}"))
        .json(&serde_json::json!({ "value": 1.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .delete(format!("http://{addr}/api/historical-data/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_create_rejects_blank_country() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/historical-data"))
        .json(&serde_json::json!({
            "date": "2024-01-01",
            "country": "  ",
            "indicator": "cases",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("required"));
}

#[tokio::test]
async fn test_filter_and_country_listing() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    seed(&client, addr, "2024-01-01", "France", "FRA", "cases", 10.0).await;
    seed(&client, addr, "2024-01-02", "France", "FRA", "cases", 20.0).await;
    seed(&client, addr, "2024-01-01", "Germany", "DEU", "cases", 30.0).await;

    // pays matches the country name
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/filter?pays=France"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["pagination"]["total"], 2);

    // pays matches the ISO code too
    let resp = client
        .get(format!("http://{addr}/api/historical-data/filter?pays=DEU"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"][0]["country"], "Germany");

    // Date range narrows the result
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/filter?pays=France&dateDebut=2024-01-02"
        ))
        .send()
        .await
        .unwrap();
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"][0]["value"], 20.0);

    // Dedicated country route
    let resp = client
        .get(format!("http://{addr}/api/historical-data/country/FRA"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["pagination"]["total"], 2);

    // Pagination math
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data?page=1&limit=2"
        ))
        .send()
        .await
        .unwrap();
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["pages"], 2);
}

#[tokio::test]
async fn test_aggregation_moving_average() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    for (i, v) in [1.0, 2.0, 3.0, 4.0, 5.0].iter().enumerate() {
        let date = format!("2024-01-{:02}", i + 1);
        seed(&client, addr, &date, "France", "FRA", "cases", *v).await;
    }

    // `moyenne` and `periode` are the legacy parameter spellings
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/aggregation?pays=France&indicator=cases&operation=moyenne&periode=3"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["meta"]["operation"], "moving-average");
    assert_eq!(body["meta"]["window"], 3);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 5);
    assert!(data[0]["value"].is_null());
    assert!(data[1]["value"].is_null());
    assert_eq!(data[2]["value"], 2.0);
    assert_eq!(data[4]["value"], 4.0);

    // A per-date reducer ignores the window
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/aggregation?pays=France&indicator=cases&operation=sum"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["meta"]["operation"], "sum");
    assert_eq!(body["data"][0]["value"], 1.0);
}

#[tokio::test]
async fn test_aggregation_param_validation() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    // Missing pays
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/aggregation?indicator=cases"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("pays"));

    // Zero window
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/aggregation?pays=France&indicator=cases&periode=0"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // No matching records
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/aggregation?pays=Atlantis&indicator=cases"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_stats_summary() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    for (i, v) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
        let date = format!("2024-02-{:02}", i + 1);
        seed(&client, addr, &date, "France", "FRA", "cases", *v).await;
    }

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/stats?pays=France&indicator=cases"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    let stats = &body["stats"];
    assert_eq!(stats["count"], 4);
    assert_eq!(stats["mean"], 25.0);
    assert_eq!(stats["min"], 10.0);
    assert_eq!(stats["max"], 40.0);
    // Nearest-rank quantiles over a sorted series of 4
    assert_eq!(stats["median"], 20.0);
    assert_eq!(stats["q25"], 10.0);
    assert_eq!(stats["q75"], 30.0);
}

#[tokio::test]
async fn test_rt_estimator() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    for (i, v) in [100.0, 100.0, 100.0, 100.0, 200.0, 400.0].iter().enumerate() {
        let date = format!("2024-03-{:02}", i + 1);
        seed(&client, addr, &date, "France", "FRA", "cases", *v).await;
    }

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/rt?pays=France&indicator=cases&periode=2"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["meta"]["estimator"], "geometric-growth-rate");
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 6);
    assert!(data[0]["rt"].is_null());
    assert!(data[1]["rt"].is_null());
    assert_eq!(data[3]["rt"], 1.0);
    // 200 cases two days after 100: rt = sqrt(2)
    let rt4 = data[4]["rt"].as_f64().unwrap();
    assert!((rt4 - std::f64::consts::SQRT_2).abs() < 1e-9);
    let rt5 = data[5]["rt"].as_f64().unwrap();
    assert!((rt5 - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_mortality_rate() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    for i in 1..=5 {
        let date = format!("2024-04-{i:02}");
        seed(&client, addr, &date, "France", "FRA", "cases", 100.0).await;
        seed(&client, addr, &date, "France", "FRA", "deaths", 10.0).await;
    }

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/mortality-rate?pays=France&periode=3"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 5);
    assert!(data[0]["mortality_rate"].is_null());
    assert!(data[1]["mortality_rate"].is_null());
    // 30 deaths over 300 cases in every full window
    for row in &data[2..] {
        assert_eq!(row["mortality_rate"], 0.1);
        assert_eq!(row["total_cases"], 300.0);
        assert_eq!(row["total_deaths"], 30.0);
    }
}

#[tokio::test]
async fn test_mortality_rate_without_data() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/mortality-rate?pays=Atlantis"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_geographic_spread_single_day() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    let values = [
        ("Austria", "AUT", 1.0),
        ("Belgium", "BEL", 2.0),
        ("Croatia", "HRV", 3.0),
        ("Denmark", "DNK", 100.0),
        ("Estonia", "EST", 101.0),
    ];
    for (country, iso, v) in values {
        seed(&client, addr, "2024-05-01", country, iso, "cases", v).await;
    }

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/geographic-spread?indicator=cases&date=2024-05-01&k=2"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["meta"]["variant"], "one-dimensional");
    assert_eq!(body["meta"]["count"], 5);
    let clusters = body["clusters"].as_array().unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0]["cluster"], 1);
    // Low-incidence countries end up together, high-incidence apart
    let sizes: Vec<usize> = clusters
        .iter()
        .map(|c| c["countries"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes.iter().sum::<usize>(), 5);
    assert!(sizes.contains(&3) && sizes.contains(&2));
}

#[tokio::test]
async fn test_geographic_spread_validation() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    // Missing indicator
    let resp = client
        .get(format!("http://{addr}/api/historical-data/geographic-spread"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // k out of range
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/geographic-spread?indicator=cases&k=0"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Valid parameters but empty table
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/geographic-spread?indicator=cases"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_ml_ready_features() {
    let (addr, _handle) = spawn_server().await;
    let client = reqwest::Client::new();

    for i in 1..=10 {
        let date = format!("2024-06-{i:02}");
        seed(&client, addr, &date, "France", "FRA", "cases", i as f64).await;
    }

    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/ml-ready?pays=France&indicator=cases&features=lag1,ma7"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 10);
    let row = data[7].as_object().unwrap();
    assert!(row.contains_key("lag1"));
    assert!(row.contains_key("ma7"));
    assert!(!row.contains_key("std7"));
    assert_eq!(row["lag1"], 7.0);
    // Mean of 2..=8
    assert_eq!(row["ma7"], 5.0);
    assert!(data[0]["lag1"].is_null());

    // Unknown features are rejected up front
    let resp = client
        .get(format!(
            "http://{addr}/api/historical-data/ml-ready?pays=France&indicator=cases&features=bogus"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}
