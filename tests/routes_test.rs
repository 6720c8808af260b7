mod common;

use actix_web::{http::header, http::StatusCode, test, web, App};
use serde_json::{json, Value};
use serial_test::serial;
use tokio_test::{assert_err, assert_ok};

use campus_tours_api::config::{AppConfig, ConfigNotice};
use campus_tours_api::db::store::{collections, DocumentStore};
use campus_tours_api::routes;

use common::{slot, tomorrow, tour, TestApp, ADMIN_EMAIL};

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

/// Registers through the identity service and returns a session token
/// with the new user's id.
async fn sign_up(test_app: &TestApp, email: &str) -> (String, String) {
    let identity = &test_app.state.identity;
    let user = identity
        .sign_up(email, "hunter22", Some("Ada Lovelace"))
        .await
        .unwrap();
    (identity.issue_token(&user).unwrap(), user.uid)
}

fn checkout_body(time: &str, cvv: &str) -> Value {
    json!({
        "tourId": "apple",
        "date": tomorrow().to_string(),
        "time": time,
        "guest": {
            "fullName": "Ada Lovelace",
            "email": "ada@example.com",
            "phone": "555-0100",
            "numberOfGuests": 2
        },
        "payment": {
            "card": {
                "cardNumber": "4242 4242 4242 4242",
                "expiryDate": "12/30",
                "cvv": cvv,
                "cardholderName": "Ada Lovelace"
            }
        }
    })
}

#[actix_rt::test]
#[serial]
async fn test_health_reports_store() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["services"]["store"]["status"], "ok");
}

#[actix_rt::test]
#[serial]
async fn test_signup_signin_and_session() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/signup")
        .set_json(json!({ "email": "Ada@Example.com", "password": "hunter22", "displayName": "Ada Lovelace" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();
    let uid = body["user"]["uid"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/api/auth/session")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["uid"], uid.as_str());
    assert_eq!(body["user"]["email"], "ada@example.com");

    let req = test::TestRequest::post()
        .uri("/api/auth/signin")
        .set_json(json!({ "email": "ada@example.com", "password": "wrong-pass" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Incorrect password. Please try again.");

    let req = test::TestRequest::post()
        .uri("/api/auth/signin")
        .set_json(json!({ "email": "ada@example.com", "password": "hunter22" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::post()
        .uri("/api/auth/signup")
        .set_json(json!({ "email": "ada@example.com", "password": "hunter22" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_rt::test]
#[serial]
async fn test_protected_routes_need_a_token() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    for uri in ["/api/bookings", "/api/auth/session", "/api/profile"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let err = assert_err!(test::try_call_service(&app, req).await);
        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }

    let req = test::TestRequest::get()
        .uri("/api/bookings")
        .insert_header(bearer("not-a-jwt"))
        .to_request();
    let err = assert_err!(test::try_call_service(&app, req).await);
    assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
#[serial]
async fn test_federated_sign_in() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post()
        .uri("/api/auth/federated")
        .set_json(json!({ "provider": "google", "idToken": "valid-google-token" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["user"]["email"], "visitor@example.com");
    assert_eq!(body["user"]["displayName"], "Grace Hopper");
    assert_eq!(body["user"]["providers"], json!(["google.com"]));
    assert!(body["token"].is_string());

    let req = test::TestRequest::post()
        .uri("/api/auth/federated")
        .set_json(json!({ "provider": "google", "clientError": "auth/popup-closed-by-user" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
#[serial]
async fn test_checkout_books_and_decrements_slot() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_slot(&slot("s1", "apple", tomorrow(), "09:00", 5)).await;
    let app = test::init_service(test_app.create_app()).await;
    let (token, uid) = sign_up(&test_app, "ada@example.com").await;

    let req = test::TestRequest::post()
        .uri("/api/bookings/checkout")
        .insert_header(bearer(&token))
        .set_json(checkout_body("09:00", "123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let confirmation: Value = test::read_body_json(resp).await;
    assert_eq!(confirmation["total"], 192.24);
    assert_eq!(confirmation["guests"], 2);
    assert_eq!(confirmation["promoApplied"], false);

    let remaining = assert_ok!(test_app.state.bookings.get_slot("s1").await).unwrap();
    assert_eq!(remaining.available_spots, 3);

    let req = test::TestRequest::get()
        .uri("/api/bookings")
        .insert_header(bearer(&token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let bookings: Value = test::read_body_json(resp).await;
    assert_eq!(bookings.as_array().unwrap().len(), 1);
    assert_eq!(bookings[0]["_id"], confirmation["bookingId"]);
    assert_eq!(bookings[0]["userId"], uid.as_str());
}

#[actix_rt::test]
#[serial]
async fn test_checkout_rejects_bad_input() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_slot(&slot("s1", "apple", tomorrow(), "09:00", 5)).await;
    let app = test::init_service(test_app.create_app()).await;
    let (token, _) = sign_up(&test_app, "ada@example.com").await;

    let req = test::TestRequest::post()
        .uri("/api/bookings/checkout")
        .insert_header(bearer(&token))
        .set_json(checkout_body("09:00", "12"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["fields"]["cvv"].is_string());

    let req = test::TestRequest::post()
        .uri("/api/bookings/checkout")
        .insert_header(bearer(&token))
        .set_json(checkout_body("16:00", "123"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["fields"]["time"].is_string());

    assert!(test_app.store.documents(collections::BOOKINGS).is_empty());
    let untouched = test_app.state.bookings.get_slot("s1").await.unwrap().unwrap();
    assert_eq!(untouched.available_spots, 5);
}

#[actix_rt::test]
#[serial]
async fn test_only_owner_updates_booking_status() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_slot(&slot("s1", "apple", tomorrow(), "09:00", 5)).await;
    let app = test::init_service(test_app.create_app()).await;
    let (owner, _) = sign_up(&test_app, "ada@example.com").await;
    let (stranger, _) = sign_up(&test_app, "eve@example.com").await;

    let req = test::TestRequest::post()
        .uri("/api/bookings/checkout")
        .insert_header(bearer(&owner))
        .set_json(checkout_body("09:00", "123"))
        .to_request();
    let confirmation: Value = test::call_and_read_body_json(&app, req).await;
    let id = confirmation["bookingId"].as_str().unwrap().to_string();

    let req = test::TestRequest::put()
        .uri(&format!("/api/bookings/{}/status", id))
        .insert_header(bearer(&stranger))
        .set_json(json!({ "status": "cancelled" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    let req = test::TestRequest::put()
        .uri("/api/bookings/missing/status")
        .insert_header(bearer(&owner))
        .set_json(json!({ "status": "cancelled" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::put()
        .uri(&format!("/api/bookings/{}/status", id))
        .insert_header(bearer(&owner))
        .set_json(json!({ "status": "cancelled" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "cancelled");
}

#[actix_rt::test]
#[serial]
async fn test_unique_tours_preselect_company() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_tour(&tour("apple-2", "Apple", 95.0, 4.5, false)).await;
    test_app.insert_tour(&tour("google", "Google", 79.0, 4.8, true)).await;
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::get()
        .uri("/api/tours/unique?company=google")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["tours"].as_array().unwrap().len(), 2);
    assert_eq!(body["preselected"]["_id"], "google");

    let req = test::TestRequest::get().uri("/api/tours/unique").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["preselected"].is_null());

    let req = test::TestRequest::get().uri("/api/tours/nope").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
#[serial]
async fn test_slot_ranges_are_bounded() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_slot(&slot("s1", "apple", tomorrow(), "09:00", 5)).await;
    let app = test::init_service(test_app.create_app()).await;

    for uri in [
        "/api/tours/apple/slots?start=%2B262142-12-31",
        "/api/tours/apple/calendar?start=%2B262142-12-31",
        "/api/tours/apple/calendar?start=2026-01-01&end=%2B9999-12-31",
        "/api/tours/apple/slots?start=2026-01-01&end=2027-06-01",
        "/api/tours/apple/calendar?start=2026-02-01&end=2026-01-01",
    ] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "{}", uri);
    }

    let start = tomorrow();
    let end = start + chrono::Duration::days(365);
    let req = test::TestRequest::get()
        .uri(&format!("/api/tours/apple/calendar?start={}&end={}", start, end))
        .to_request();
    let days: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(days.as_array().unwrap().len(), 366);
    assert_eq!(days[0]["selectable"], true);
}

#[actix_rt::test]
#[serial]
async fn test_slot_outage_is_retryable() {
    let test_app = TestApp::new();
    test_app.insert_tour(&tour("apple", "Apple", 89.0, 4.9, true)).await;
    test_app.insert_slot(&slot("s1", "apple", tomorrow(), "09:00", 5)).await;
    test_app.store.fail_queries_on(collections::SLOTS);
    let app = test::init_service(test_app.create_app()).await;

    for uri in ["/api/tours/apple/slots", "/api/tours/apple/calendar"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500, "{}", uri);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["retryable"], true);
        assert_eq!(body["error"], "Failed to fetch available slots");
    }
}

#[actix_rt::test]
#[serial]
async fn test_stats_are_admin_only() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;
    let (customer, _) = sign_up(&test_app, "ada@example.com").await;
    let (admin, _) = sign_up(&test_app, ADMIN_EMAIL).await;

    for uri in [
        "/api/stats/bookings?start=2030-01-01&end=2030-01-31",
        "/api/stats/slots?start=2030-01-01&end=2030-01-31",
    ] {
        let req = test::TestRequest::get()
            .uri(uri)
            .insert_header(bearer(&customer))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403, "{}", uri);

        let req = test::TestRequest::get()
            .uri(uri)
            .insert_header(bearer(&admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "{}", uri);
    }
}

#[actix_rt::test]
#[serial]
async fn test_debug_seed_then_inspect() {
    let test_app = TestApp::new();
    let app = test::init_service(test_app.create_app()).await;

    let req = test::TestRequest::post().uri("/api/debug/seed").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["toursAdded"], 6);

    let req = test::TestRequest::post().uri("/api/debug/seed").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/api/debug/inspect").to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary["tours"], 6);
    assert_eq!(summary["activeTours"], 6);
    assert_eq!(summary["duplicateCompanies"], json!([]));
    assert_eq!(
        summary["slots"].as_u64(),
        Some(assert_ok!(test_app.store.count(collections::SLOTS).await))
    );
}

#[actix_rt::test]
#[serial]
async fn test_debug_routes_hidden_unless_enabled() {
    let test_app = TestApp::new();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(test_app.state.clone()))
            .configure(|cfg| routes::configure(cfg, false)),
    )
    .await;

    let req = test::TestRequest::post().uri("/api/debug/seed").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
#[serial]
async fn test_unconfigured_server_answers_503() {
    let err = assert_err!(AppConfig::from_lookup(|_| None));
    let notice = ConfigNotice::from(&err);
    let app = test::init_service(
        App::new().configure(|cfg| routes::configure_notice(cfg, notice.clone())),
    )
    .await;

    for uri in ["/health", "/api/tours"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 503);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "unconfigured");
        assert_eq!(body["missing"], json!(["MONGODB_URI", "JWT_SECRET"]));
    }
}
