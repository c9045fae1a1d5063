//! End-to-end tests of the `/api/v1` surface against `MemoryStore`.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`, so no
//! database or network listener is needed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use parceldesk::clock::ManualClock;
use parceldesk::config;
use parceldesk::lifecycle::{ConfirmMode, ParcelLifecycle};
use parceldesk::models::resident::Resident;
use parceldesk::server;
use parceldesk::signing::{PickupSigner, TokenTtl};
use parceldesk::store::memory::MemoryStore;
use parceldesk::AppState;

const ADMIN_KEY: &str = "front-desk-key";
const SIGNING_KEY: [u8; 32] = [7u8; 32];

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    resident: Resident,
    store: MemoryStore,
}

impl Harness {
    fn new(mode: ConfirmMode) -> Self {
        let key_hex = hex::encode(SIGNING_KEY);
        let cfg = config::from_env(|k| match k {
            "PARCELDESK_ADMIN_KEY" => Some(ADMIN_KEY.to_string()),
            "PARCELDESK_SIGNING_KEY" => Some(key_hex.clone()),
            _ => None,
        })
        .unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 14, 9, 0, 0).unwrap(),
        ));
        let store = MemoryStore::new();
        let resident =
            store.add_resident("user_2abc", "Meera Nair", "meera@example.com", Some("C-204"));

        let signer = PickupSigner::from_hex(&cfg.signing_key, clock.clone()).unwrap();
        let lifecycle = ParcelLifecycle::new(Arc::new(store.clone()), signer, cfg.token_ttl)
            .with_confirm_mode(mode);
        let state = Arc::new(AppState {
            lifecycle,
            config: cfg,
        });

        Self {
            app: server::app(state),
            clock,
            resident,
            store,
        }
    }

    /// A token exactly as the QR code would carry it.
    fn token_for(&self, parcel_id: i64) -> String {
        PickupSigner::new(&SIGNING_KEY, self.clock.clone())
            .unwrap()
            .issue(&parcel_id.to_string(), TokenTtl::default())
            .token
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, bytes) = self.send_raw(method, uri, body, Some(ADMIN_KEY)).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(k) = key {
            req = req.header("x-admin-key", k);
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn register(&self) -> Value {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/v1/parcels",
                Some(json!({
                    "resident_id": self.resident.id,
                    "description": "Blue box",
                    "service": "Delhivery",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }
}

#[tokio::test]
async fn test_register_scan_and_rescan() {
    let h = Harness::new(ConfirmMode::Strict);
    let parcel = h.register().await;
    assert_eq!(parcel["status"], "PENDING");
    assert!(parcel["picked_up_time"].is_null());
    let id = parcel["id"].as_i64().unwrap();

    let token = h.token_for(id);
    h.clock.advance(Duration::hours(1));

    let (status, body) = h
        .send(Method::POST, "/api/v1/pickups/scan", Some(json!({ "token": token })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["parcel"]["status"], "PICKED_UP");
    assert_eq!(body["resident"]["name"], "Meera Nair");
    assert_eq!(body["message"], "Parcel marked as picked up");
    let picked_at = body["parcel"]["picked_up_time"].clone();

    h.clock.advance(Duration::minutes(5));
    let (status, body) = h
        .send(Method::POST, "/api/v1/pickups/scan", Some(json!({ "token": token })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_picked_up");

    let (_, stored) = h.send(Method::GET, &format!("/api/v1/parcels/{}", id), None).await;
    assert_eq!(stored["picked_up_time"], picked_at);
}

#[tokio::test]
async fn test_scan_error_codes() {
    let h = Harness::new(ConfirmMode::Strict);
    let id = h.register().await["id"].as_i64().unwrap();
    let token = h.token_for(id);

    let (status, body) = h
        .send(
            Method::POST,
            "/api/v1/pickups/scan",
            Some(json!({ "token": "garbage" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_token");

    let forged = PickupSigner::new(&[9u8; 32], h.clock.clone())
        .unwrap()
        .issue(&id.to_string(), TokenTtl::default())
        .token;
    let (status, body) = h
        .send(Method::POST, "/api/v1/pickups/scan", Some(json!({ "token": forged })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_token");

    h.clock.advance(Duration::hours(49));
    let (status, body) = h
        .send(Method::POST, "/api/v1/pickups/scan", Some(json!({ "token": token })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "token_expired");

    let (_, stored) = h.send(Method::GET, &format!("/api/v1/parcels/{}", id), None).await;
    assert_eq!(stored["status"], "PENDING");

    let (status, body) = h
        .send(Method::POST, "/api/v1/pickups/scan", Some(json!({ "token": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_token");
}

#[tokio::test]
async fn test_qr_endpoints() {
    let h = Harness::new(ConfirmMode::Strict);
    let id = h.register().await["id"].as_i64().unwrap();

    let (status, headers, bytes) = h
        .send_raw(
            Method::GET,
            &format!("/api/v1/parcels/{}/qr", id),
            None,
            Some(ADMIN_KEY),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    assert!(headers.contains_key("x-pickup-expires-at"));

    let (status, body) = h
        .send(Method::GET, &format!("/api/v1/parcels/{}/qr/base64", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parcel_id"], id);
    assert!(body["image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
    assert!(body["expires_at"].is_string());

    let (status, body) = h
        .send(Method::GET, "/api/v1/parcels/999/qr/base64", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "parcel_not_found");

    let (status, _) = h
        .send(Method::PATCH, &format!("/api/v1/parcels/{}/picked-up", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .send(Method::GET, &format!("/api/v1/parcels/{}/qr/base64", id), None)
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["code"], "parcel_not_pending");
}

#[tokio::test]
async fn test_direct_confirmation_modes() {
    let strict = Harness::new(ConfirmMode::Strict);
    let id = strict.register().await["id"].as_i64().unwrap();
    let uri = format!("/api/v1/parcels/{}/picked-up", id);

    let (status, body) = strict.send(Method::PATCH, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parcel"]["status"], "PICKED_UP");
    let (status, body) = strict.send(Method::PATCH, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_picked_up");

    let lenient = Harness::new(ConfirmMode::Lenient);
    let id = lenient.register().await["id"].as_i64().unwrap();
    let uri = format!("/api/v1/parcels/{}/picked-up", id);
    let (_, first) = lenient.send(Method::PATCH, &uri, None).await;
    lenient.clock.advance(Duration::hours(2));
    let (status, second) = lenient.send(Method::PATCH, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        first["parcel"]["picked_up_time"],
        second["parcel"]["picked_up_time"]
    );

    let (status, _) = lenient
        .send(Method::PATCH, "/api/v1/parcels/4040/picked-up", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_listing_and_lookup() {
    let h = Harness::new(ConfirmMode::Strict);
    let first = h.register().await;
    let second = h.register().await;
    h.send(
        Method::PATCH,
        &format!("/api/v1/parcels/{}/picked-up", first["id"]),
        None,
    )
    .await;

    let (status, all) = h.send(Method::GET, "/api/v1/parcels", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, pending) = h
        .send(Method::GET, "/api/v1/parcels?status=pending", None)
        .await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], second["id"]);

    let (status, body) = h
        .send(Method::GET, "/api/v1/parcels?status=lost", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, by_tracking) = h
        .send(
            Method::GET,
            &format!(
                "/api/v1/parcels/tracking/{}",
                second["tracking_id"].as_str().unwrap()
            ),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_tracking["id"], second["id"]);

    let (status, _) = h
        .send(Method::GET, "/api/v1/parcels/tracking/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, mine) = h
        .send(Method::GET, "/api/v1/residents/user_2abc/parcels", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["resident"]["room_number"], "C-204");
    assert_eq!(mine["parcels"].as_array().unwrap().len(), 2);

    let (status, body) = h
        .send(Method::GET, "/api/v1/residents/nobody/parcels", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "resident_not_found");
}

#[tokio::test]
async fn test_register_validation() {
    let h = Harness::new(ConfirmMode::Strict);

    let (status, body) = h
        .send(
            Method::POST,
            "/api/v1/parcels",
            Some(json!({ "resident_id": 77 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "resident_not_found");

    let (status, body) = h
        .send(
            Method::POST,
            "/api/v1/parcels",
            Some(json!({ "resident_id": h.resident.id, "service": "s".repeat(101) })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
    assert_eq!(h.store.parcel_count(), 0);
}

#[tokio::test]
async fn test_staff_key_required() {
    let h = Harness::new(ConfirmMode::Strict);

    let (status, _, _) = h
        .send_raw(Method::GET, "/api/v1/parcels", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = h
        .send_raw(Method::GET, "/api/v1/parcels", None, Some("wrong-key-000"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/v1/parcels")
        .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_KEY))
        .body(Body::empty())
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoints_and_response_headers() {
    let h = Harness::new(ConfirmMode::Strict);

    for path in ["/healthz", "/readyz"] {
        let (status, headers, _) = h.send_raw(Method::GET, path, None, None).await;
        assert_eq!(status, StatusCode::OK, "{}", path);
        assert!(headers.contains_key("x-request-id"));
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["cache-control"], "no-store");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_scans_over_http() {
    let h = Harness::new(ConfirmMode::Strict);
    let id = h.register().await["id"].as_i64().unwrap();
    let token = h.token_for(id);

    let scans = (0..8).map(|_| {
        h.send(
            Method::POST,
            "/api/v1/pickups/scan",
            Some(json!({ "token": token })),
        )
    });
    let results = futures::future::join_all(scans).await;

    let ok = results.iter().filter(|(s, _)| *s == StatusCode::OK).count();
    let conflicts = results
        .iter()
        .filter(|(s, _)| *s == StatusCode::CONFLICT)
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_lenient_state_keeps_scans_strict() {
    let cfg = config::from_env(|k| match k {
        "PARCELDESK_ADMIN_KEY" => Some(ADMIN_KEY.to_string()),
        "PARCELDESK_SIGNING_KEY" => Some(hex::encode(SIGNING_KEY)),
        "PARCELDESK_CONFIRM_MODE" => Some("lenient".to_string()),
        _ => None,
    })
    .unwrap();
    let store = MemoryStore::new();
    let resident = store.add_resident("user_9", "Ravi", "ravi@example.com", None);
    let state = server::build_state(cfg, Arc::new(store)).unwrap();
    assert_eq!(state.lifecycle.confirm_mode(), ConfirmMode::Lenient);

    let desk = &state.lifecycle;
    let parcel = desk
        .register_parcel(parceldesk::lifecycle::RegisterParcel {
            resident_id: resident.id,
            ..Default::default()
        })
        .await
        .unwrap();
    let token = desk.issue_pickup_token(parcel.id).await.unwrap().token;
    desk.confirm_by_token(&token).await.unwrap();

    // Staff may repeat a confirmation; a second scan is still refused.
    let again = desk.confirm_direct(parcel.id).await.unwrap();
    assert_eq!(again.picked_up_time, desk.get_parcel(parcel.id).await.unwrap().picked_up_time);
    assert!(matches!(
        desk.confirm_by_token(&token).await,
        Err(parceldesk::errors::AppError::AlreadyPickedUp)
    ));
}
