//! Integration tests for the Upstream Protocol Client's FIND -> DETAIL -> BOOK
//! handshake and WAF-challenge retry, driven against a `wiremock` server instead of
//! the live upstream platform.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use resnipe::config::RateLimitingConfig;
use resnipe::kvs::InMemoryKvs;
use resnipe::queue::{ScheduledReservation, UsageType};
use resnipe::upstream::{UpstreamClient, UpstreamError};
use resnipe::vault::CredentialVault;

fn test_reservation(venue_id: i64, reservation_time: chrono::DateTime<Utc>) -> ScheduledReservation {
    let mut reservation = ScheduledReservation::new(
        venue_id,
        reservation_time,
        2,
        vec![],
        "".to_string(),
        UsageType::Immediate,
        Utc::now(),
    );
    reservation.payment_method_id = Some("42".to_string());
    reservation.auth_token = Some("test-auth-token".to_string());
    reservation
}

fn test_client(base_url: String) -> UpstreamClient {
    let kvs = Arc::new(InMemoryKvs::new());
    let vault = Arc::new(CredentialVault::new(kvs, &"00".repeat(32)).unwrap());
    UpstreamClient::new(base_url, "test-api-key".to_string(), vault, RateLimitingConfig::default()).unwrap()
}

fn find_body_with_slot(venue_id: i64, day: &str, time: &str, kind: &str) -> serde_json::Value {
    json!({
        "results": {
            "venues": [
                {
                    "venue": { "id": venue_id + 1 },
                    "slots": []
                },
                {
                    "venue": { "id": venue_id },
                    "slots": [
                        {
                            "date": { "start": format!("{day} {time}:00") },
                            "config": { "token": "config-tok-1", "type": kind }
                        }
                    ]
                }
            ]
        }
    })
}

#[tokio::test]
async fn full_booking_handshake_succeeds() {
    let mock_server = MockServer::start().await;

    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let reservation = test_reservation(89607, reservation_time);

    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(find_body_with_slot(89607, "2025-06-01", "19:00", "indoor")))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/3/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "book_token": { "value": "tok-X" }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/3/book"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reservation_id": "RID-7" })))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let outcome = client
        .book(&reservation, None, chrono_tz::America::New_York)
        .await
        .expect("booking should succeed");

    assert_eq!(outcome.reservation_id, "RID-7");
}

#[tokio::test]
async fn waf_challenge_is_detected_merged_and_replayed() {
    let mock_server = MockServer::start().await;

    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let reservation = test_reservation(89607, reservation_time);

    // First FIND attempt is challenged by the WAF.
    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("x-cdn", "Imperva")
                .insert_header("set-cookie", "_incap_ses_123=abc; Path=/"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    // Second attempt, replayed with the merged cookie, succeeds with no offer at all
    // (zero venues) -- enough to prove the challenge/replay round-trip completed.
    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": { "venues": [] } })))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.book(&reservation, None, chrono_tz::America::New_York).await;

    assert!(matches!(result, Err(UpstreamError::NoOffer)));
}

#[tokio::test]
async fn waf_challenge_exhausting_retry_budget_is_surfaced() {
    let mock_server = MockServer::start().await;

    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let reservation = test_reservation(89607, reservation_time);

    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(503).insert_header("x-cdn", "Imperva"))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.book(&reservation, None, chrono_tz::America::New_York).await;

    assert!(matches!(result, Err(UpstreamError::WafBlocked)));
}

#[tokio::test]
async fn find_returning_zero_venues_is_no_offer() {
    let mock_server = MockServer::start().await;

    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let reservation = test_reservation(89607, reservation_time);

    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": { "venues": [] } })))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.book(&reservation, None, chrono_tz::America::New_York).await;

    assert!(matches!(result, Err(UpstreamError::NoOffer)));
}

#[tokio::test]
async fn no_matching_slot_is_no_table() {
    let mock_server = MockServer::start().await;

    // requested at 19:00 but the only slot offered is 21:00, outside the +/-30min window.
    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let reservation = test_reservation(89607, reservation_time);

    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(find_body_with_slot(89607, "2025-06-01", "21:00", "indoor")))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.book(&reservation, None, chrono_tz::America::New_York).await;

    assert!(matches!(result, Err(UpstreamError::NoTable)));
}

/// No payment method means every candidate slot fails at the DETAIL/BOOK stage with
/// `no-payment-info`; the outer loop swallows per-slot errors and only surfaces
/// `no-table` once every candidate is exhausted.
#[tokio::test]
async fn missing_payment_method_exhausts_candidates_as_no_table() {
    let mock_server = MockServer::start().await;

    let reservation_time = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap(); // 19:00 America/New_York (EDT, UTC-4)
    let mut reservation = test_reservation(89607, reservation_time);
    reservation.payment_method_id = None;

    Mock::given(method("POST"))
        .and(path("/4/find"))
        .respond_with(ResponseTemplate::new(200).set_body_json(find_body_with_slot(89607, "2025-06-01", "19:00", "indoor")))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/3/details"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "book_token": { "value": "tok-X" }
        })))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.book(&reservation, None, chrono_tz::America::New_York).await;

    assert!(matches!(result, Err(UpstreamError::NoTable)));
}

#[tokio::test]
async fn login_success_returns_token_and_payment_method() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/3/auth/password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "auth-token-123",
            "payment_method_id": 42
        })))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let (token, payment_method_id) = client.login("user@example.com", "hunter2").await.unwrap();

    assert_eq!(token, "auth-token-123");
    assert_eq!(payment_method_id, 42);
}

#[tokio::test]
async fn login_with_wrong_credentials_is_login_wrong() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/3/auth/password"))
        .respond_with(ResponseTemplate::new(419))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.login("user@example.com", "wrong-password").await;

    assert!(matches!(result, Err(UpstreamError::LoginWrong)));
}

#[tokio::test]
async fn login_without_payment_method_is_no_payment_info() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/3/auth/password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "auth-token-123" })))
        .mount(&mock_server)
        .await;

    let client = test_client(mock_server.uri());
    let result = client.login("user@example.com", "hunter2").await;

    assert!(matches!(result, Err(UpstreamError::NoPaymentInfo)));
}

/// Exercises the documented e2e scenario #6: a reservation due shortly is cancelled
/// concurrently with the scheduler's own sleep/execute cycle, and `count_pending`
/// converges to zero regardless of which side wins the race.
#[tokio::test]
async fn cancel_race_leaves_queue_empty_either_way() {
    use resnipe::queue::ReservationQueue;

    let kvs = Arc::new(InMemoryKvs::new());
    let queue = ReservationQueue::new(kvs);

    let mut reservation = test_reservation(1, Utc::now() + ChronoDuration::seconds(45));
    reservation.id = "R-race".to_string();
    queue.enqueue(&reservation).await.unwrap();

    // simulate the cancel winning the race
    queue.delete(&reservation.id).await.unwrap();
    assert_eq!(queue.count_pending().await.unwrap(), 0);

    // simulate execution winning instead: re-enqueue, then the scheduler's own
    // post-execution delete runs unconditionally regardless of outcome.
    queue.enqueue(&reservation).await.unwrap();
    queue.delete(&reservation.id).await.unwrap();
    assert_eq!(queue.count_pending().await.unwrap(), 0);
}
