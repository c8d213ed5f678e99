use axum::http::StatusCode;
use eventing_server::apps::travel::{BOOKING_PREFIX, Traveller};
use regex::Regex;
use serde_json::{Value, json};
use tower::ServiceExt;

mod support;

use support::{body_bytes, body_json, get, post_form, post_json, post_lines, test_app};

#[tokio::test]
async fn ping_reports_version() {
    let (_, app) = test_app().await;

    let response = app.oneshot(get("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn ingested_brewery_is_visible_through_the_bridge() {
    let (state, app) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_lines(
            "/feed/events",
            &[json!({"op": "mutation", "key": "u1", "doc": {"city": "San Francisco"}, "seq": 1})],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let report = body_json(response).await;
    assert_eq!(report["forwarded"], 1);
    assert_eq!(report["rejected"], 0);
    state.dispatcher.wait_idle().await;

    let response = app
        .clone()
        .oneshot(post_form("/get_breweries_by_city", "city=San+Francisco"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["city"], "San Francisco");
    assert_eq!(body["brewery_count"], 1);
    assert_eq!(body["breweries"], json!(["u1"]));

    let sf = body_json(app.oneshot(get("/get_breweries_in_sf")).await.unwrap()).await;
    assert_eq!(sf["brewery_count"], 1);
}

#[tokio::test]
async fn later_batch_without_seq_updates_the_same_key() {
    let (state, app) = test_app().await;

    for city in ["Bend", "Portland"] {
        let response = app
            .clone()
            .oneshot(post_lines(
                "/feed/events",
                &[json!({"op": "mutation", "key": "b1", "doc": {"type": "brewery", "city": city}})],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        state.dispatcher.wait_idle().await;
    }

    let stats = state.dispatcher.stats();
    assert_eq!((stats.received, stats.succeeded, stats.skipped), (2, 2, 0));

    let body = body_json(
        app.clone()
            .oneshot(post_form("/get_breweries_by_city", "city=Portland"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["brewery_count"], 1);
    assert_eq!(body["breweries"], json!(["b1"]));

    let health = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["checks"]["feed"]["tracked_keys"], 1);
    assert_eq!(health["checks"]["dispatcher"]["tracked_keys"], 1);
}

#[tokio::test]
async fn booking_returns_id_and_updates_the_traveller() {
    let (state, app) = test_app().await;

    let response = app
        .oneshot(post_json(
            "/book_tickets",
            &json!({"user_id": "u1", "src": "SFO", "dst": "JFK"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], "u1");
    let booking_id = body["booking_id"].as_str().unwrap().to_string();
    let pattern = Regex::new(&format!("^{BOOKING_PREFIX}[0-9]+$")).unwrap();
    assert!(pattern.is_match(&booking_id), "unexpected id {booking_id}");

    let bucket = state.bridge.context().bucket(&state.config.buckets.travel);
    let traveller: Traveller = bucket.get("u1").await.unwrap().unwrap();
    assert_eq!(traveller.booking_ids, vec![booking_id]);
}

#[tokio::test]
async fn query_string_parameters_reach_post_routes() {
    let (_, app) = test_app().await;

    let response = app
        .oneshot(post_form("/get_breweries_by_state?state=Oregon", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "Oregon");
    assert_eq!(body["brewery_count"], 0);
}

#[tokio::test]
async fn unmatched_requests_get_an_empty_404() {
    let (_, app) = test_app().await;

    for request in [
        get("/no_such_route"),
        get("/get_breweries_by_city"),
        post_json("/get_beer_count", &json!({})),
    ] {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn missing_parameter_is_an_empty_400() {
    let (_, app) = test_app().await;

    let response = app
        .oneshot(post_json("/book_tickets", &json!({"user_id": "u1", "src": "SFO"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn malformed_feed_lines_are_counted_not_fatal() {
    let (state, app) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_lines(
            "/feed/events",
            &[
                json!({"op": "mutation", "key": "", "doc": {"city": "Bend"}}),
                json!({"op": "unknown"}),
                json!({"op": "mutation", "key": "b2", "doc": {"type": "brewery", "city": "Bend"}}),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let report = body_json(response).await;
    assert_eq!(report["forwarded"], 1);
    assert_eq!(report["rejected"], 2);
    state.dispatcher.wait_idle().await;

    let health = body_json(app.oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["checks"]["dispatcher"]["stats"]["succeeded"], 1);
    assert_eq!(health["checks"]["recent_failures"], Value::Array(vec![]));
}

#[tokio::test]
async fn ingest_after_shutdown_is_unavailable() {
    let (state, app) = test_app().await;
    state.dispatcher.shutdown().await;

    let response = app
        .clone()
        .oneshot(post_lines(
            "/feed/events",
            &[json!({"op": "deletion", "key": "u1"})],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["status"], 503);

    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);
}
