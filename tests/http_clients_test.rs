//! HTTP geo matcher and offer client against stub axum servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use ride_dispatch::models::Coordinate;
use ride_dispatch::services::{
    DriverOfferClient, GeoMatcher, HttpGeoMatcher, HttpOfferClient, ServiceError,
};

type Captured = Arc<Mutex<Vec<Value>>>;

async fn spawn_stub(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_geo_matcher_sends_query_and_sorts_result() {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route(
            "/v1/nearest",
            get(
                |State(captured): State<Captured>, Query(params): Query<HashMap<String, String>>| async move {
                    captured.lock().push(json!(params));
                    Json(json!({
                        "candidates": [
                            {"driver_id": 3, "distance": 2.0, "coordinate": {"lat": 51.12, "lon": 71.4}},
                            {"driver_id": 1, "distance": 0.5, "coordinate": {"lat": 51.10, "lon": 71.4}},
                            {"driver_id": 9, "distance": 2.0, "coordinate": {"lat": 51.13, "lon": 71.4}}
                        ]
                    }))
                },
            ),
        )
        .with_state(captured.clone());
    let base_url = spawn_stub(router).await;

    let geo = HttpGeoMatcher::new(&base_url, Duration::from_secs(2)).unwrap();
    let candidates = geo.nearest(Coordinate::new(51.1, 71.4), 3.5).await.unwrap();

    let ids: Vec<i64> = candidates.iter().map(|c| c.driver_id).collect();
    assert_eq!(ids, vec![1, 3, 9]);

    let params = captured.lock()[0].clone();
    assert_eq!(params["lat"], "51.1");
    assert_eq!(params["lon"], "71.4");
    assert_eq!(params["radius"], "3.5");
}

#[tokio::test]
async fn test_geo_matcher_error_status() {
    let router = Router::new().route(
        "/v1/nearest",
        get(|| async { (StatusCode::BAD_GATEWAY, "index unavailable") }),
    );
    let base_url = spawn_stub(router).await;

    let geo = HttpGeoMatcher::new(&base_url, Duration::from_secs(2)).unwrap();
    let err = geo.nearest(Coordinate::new(51.1, 71.4), 1.0).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Status { service: "geo", status: 502, ref body } if body == "index unavailable"
    ));
}

#[tokio::test]
async fn test_geo_matcher_bad_body() {
    let router = Router::new().route("/v1/nearest", get(|| async { "not json" }));
    let base_url = spawn_stub(router).await;

    let geo = HttpGeoMatcher::new(&base_url, Duration::from_secs(2)).unwrap();
    let err = geo.nearest(Coordinate::new(51.1, 71.4), 1.0).await.unwrap_err();
    assert!(matches!(err, ServiceError::Decode { .. }));
}

#[tokio::test]
async fn test_offer_client_posts_offer() {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route(
            "/v1/offers",
            post(|State(captured): State<Captured>, Json(body): Json<Value>| async move {
                captured.lock().push(body);
                Json(json!({"message": "offer delivered"}))
            }),
        )
        .with_state(captured.clone());
    let base_url = spawn_stub(router).await;

    let client = HttpOfferClient::new(&base_url, Duration::from_secs(2)).unwrap();
    let confirmation = client
        .offer(7, 42, 1.2, Coordinate::new(51.1, 71.4))
        .await
        .unwrap();
    assert_eq!(confirmation.message, "offer delivered");

    let body = captured.lock()[0].clone();
    assert_eq!(body["driver_id"], 7);
    assert_eq!(body["ride_id"], 42);
    assert_eq!(body["distance"], 1.2);
    assert_eq!(body["coordinate"]["lat"], 51.1);
}

#[tokio::test]
async fn test_offer_client_timeout() {
    let router = Router::new().route(
        "/v1/offers",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"message": "too late"}))
        }),
    );
    let base_url = spawn_stub(router).await;

    let client = HttpOfferClient::new(&base_url, Duration::from_millis(100)).unwrap();
    let err = client
        .offer(7, 42, 1.2, Coordinate::new(51.1, 71.4))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_invalid_base_url() {
    let err = HttpOfferClient::new("not a url", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidUrl { service: "offer", .. }));
}
