mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::Duration;
use common::{t0, TestApp, WEBHOOK_SECRET};
use gym_api::payment::webhook::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

#[tokio::test]
async fn test_plans_are_admin_managed() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("plans@example.com").await;

    let forbidden = app
        .post(
            "/membership-plans",
            Some(&member),
            json!({"name": "Monthly", "duration_days": 30, "price_cents": 4900}),
        )
        .await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

    let invalid = app
        .post(
            "/membership-plans",
            Some(&admin),
            json!({"name": "Zero", "duration_days": 0, "price_cents": 4900}),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    let endless = app
        .post(
            "/membership-plans",
            Some(&admin),
            json!({"name": "Forever", "duration_days": 4_000_000_000u32, "price_cents": 4900}),
        )
        .await;
    assert_eq!(endless.status, StatusCode::BAD_REQUEST);
    let priceless = app
        .post(
            "/membership-plans",
            Some(&admin),
            json!({"name": "Gold", "duration_days": 30, "price_cents": i64::MAX}),
        )
        .await;
    assert_eq!(priceless.status, StatusCode::BAD_REQUEST);

    let monthly = app.plan(&admin, "Monthly", 30, 4_900).await;
    let yearly = app.plan(&admin, "Yearly", 365, 49_000).await;

    let retired = app
        .patch(
            &format!("/membership-plans/{yearly}"),
            Some(&admin),
            json!({"active": false}),
        )
        .await;
    assert_eq!(retired.status, StatusCode::OK);

    let listed = app.get("/membership-plans", None).await;
    assert_eq!(listed.status, StatusCode::OK);
    let plans = listed.body.as_array().unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0]["id"], monthly.as_str());
}

#[tokio::test]
async fn test_purchase_activates_on_paid_webhook() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("buyer@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;

    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    assert_eq!(purchase.status, StatusCode::CREATED);
    assert_eq!(purchase.body["membership"]["status"], "pending_payment");
    assert_eq!(purchase.body["payment"]["status"], "pending");
    assert_eq!(purchase.body["payment"]["amount_cents"], 4_900);
    let reference = purchase.body["payment"]["reference"].as_str().unwrap().to_string();
    assert_eq!(
        purchase.body["checkout_url"],
        format!("https://pay.test/checkout/{reference}")
    );
    assert_eq!(app.gateway.requests.lock().unwrap()[0].customer_email, "buyer@example.com");

    let before = app.get("/memberships/me", Some(&member)).await;
    assert!(before.body["active"].is_null());

    let event = json!({
        "reference": reference,
        "status": "paid",
        "transaction_id": "txn_1",
        "amount_cents": 4_900,
    });
    let paid = app.webhook(event.clone()).await;
    assert_eq!(paid.status, StatusCode::OK);
    assert_eq!(paid.body["status"], "processed");

    let replay = app.webhook(event).await;
    assert_eq!(replay.status, StatusCode::OK);
    assert_eq!(replay.body["status"], "already_processed");

    let mine = app.get("/memberships/me", Some(&member)).await;
    let active = &mine.body["active"];
    assert_eq!(active["status"], "active");
    assert_eq!(active["starts_at"], json!(t0()));
    assert_eq!(active["ends_at"], json!(t0() + Duration::days(30)));

    let payment_id = purchase.body["payment"]["id"].as_str().unwrap();
    let payment = app.get(&format!("/payments/{payment_id}"), Some(&member)).await;
    assert_eq!(payment.status, StatusCode::OK);
    assert_eq!(payment.body["status"], "paid");
    assert_eq!(payment.body["provider_txn_id"], "txn_1");

    // Other members cannot see it
    let stranger = app.member("stranger@example.com").await;
    let hidden = app.get(&format!("/payments/{payment_id}"), Some(&stranger)).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);
    let as_admin = app.get(&format!("/payments/{payment_id}"), Some(&admin)).await;
    assert_eq!(as_admin.status, StatusCode::OK);
}

#[tokio::test]
async fn test_redelivered_webhook_finishes_interrupted_activation() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("interrupted@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;

    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    let membership_id: Uuid = purchase.body["membership"]["id"].as_str().unwrap().parse().unwrap();
    let payment_id = purchase.body["payment"]["id"].as_str().unwrap().to_string();

    // Point the membership at a plan that does not exist so activation errors out.
    let storage = app.state.storage.clone();
    let original = storage.get_membership(membership_id).await.unwrap().unwrap();
    let mut broken = original.clone();
    broken.plan_id = Uuid::new_v4();
    storage.update_membership(&broken).await.unwrap();

    let event = json!({
        "reference": purchase.body["payment"]["reference"],
        "status": "paid",
        "transaction_id": "txn_retry",
        "amount_cents": 4_900,
    });
    let first = app.webhook(event.clone()).await;
    assert_eq!(first.status, StatusCode::INTERNAL_SERVER_ERROR);
    let payment = app.get(&format!("/payments/{payment_id}"), Some(&member)).await;
    assert_eq!(payment.body["status"], "paid");
    let mine = app.get("/memberships/me", Some(&member)).await;
    assert_eq!(mine.body["memberships"][0]["status"], "pending_payment");

    storage.update_membership(&original).await.unwrap();
    let retry = app.webhook(event.clone()).await;
    assert_eq!(retry.status, StatusCode::OK);
    assert_eq!(retry.body["status"], "processed");

    let mine = app.get("/memberships/me", Some(&member)).await;
    assert_eq!(mine.body["active"]["id"], membership_id.to_string());
    assert_eq!(mine.body["active"]["ends_at"], json!(t0() + Duration::days(30)));

    let replay = app.webhook(event).await;
    assert_eq!(replay.body["status"], "already_processed");

    // A paid notification for a payment that already failed changes nothing
    let second = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    let reference = second.body["payment"]["reference"].clone();
    let failed = app
        .webhook(json!({"reference": reference, "status": "failed", "amount_cents": 4_900}))
        .await;
    assert_eq!(failed.body["status"], "processed");
    let late_paid = app
        .webhook(json!({"reference": reference, "status": "paid", "amount_cents": 4_900}))
        .await;
    assert_eq!(late_paid.status, StatusCode::OK);
    assert_eq!(late_paid.body["status"], "already_processed");
    let mine = app.get("/memberships/me", Some(&member)).await;
    assert_eq!(mine.body["memberships"].as_array().unwrap().len(), 2);
    assert_eq!(mine.body["active"]["id"], membership_id.to_string());
}

#[tokio::test]
async fn test_early_renewal_is_queued_after_current_period() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("renew@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;
    app.paid_membership(&member, &plan).await;

    app.clock.advance(Duration::days(10));
    let renewal = app.post("/memberships/renew", Some(&member), json!({})).await;
    assert_eq!(renewal.status, StatusCode::CREATED, "{:?}", renewal.body);
    let payment = &renewal.body["payment"];
    let paid = app
        .webhook(json!({
            "reference": payment["reference"],
            "status": "paid",
            "amount_cents": payment["amount_cents"],
        }))
        .await;
    assert_eq!(paid.status, StatusCode::OK);

    let mine = app.get("/memberships/me", Some(&member)).await;
    let memberships = mine.body["memberships"].as_array().unwrap();
    assert_eq!(memberships.len(), 2);
    // Newest first: the renewal starts where the first period ends
    assert_eq!(memberships[0]["starts_at"], json!(t0() + Duration::days(30)));
    assert_eq!(memberships[0]["ends_at"], json!(t0() + Duration::days(60)));
    assert_eq!(mine.body["active"]["id"], memberships[1]["id"]);
}

#[tokio::test]
async fn test_renew_without_history_is_not_found() {
    let app = TestApp::new();
    let member = app.member("fresh@example.com").await;
    let renewal = app.post("/memberships/renew", Some(&member), json!({})).await;
    assert_eq!(renewal.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_payment_cancels_membership() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("declined@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;

    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    let failed = app
        .webhook(json!({
            "reference": purchase.body["payment"]["reference"],
            "status": "failed",
            "amount_cents": 4_900,
        }))
        .await;
    assert_eq!(failed.status, StatusCode::OK);

    let mine = app.get("/memberships/me", Some(&member)).await;
    assert!(mine.body["active"].is_null());
    assert_eq!(mine.body["memberships"][0]["status"], "cancelled");
}

#[tokio::test]
async fn test_gateway_outage_is_bad_gateway() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("outage@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;
    app.gateway.fail.store(true, Ordering::SeqCst);

    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    assert_eq!(purchase.status, StatusCode::BAD_GATEWAY);
    assert_eq!(purchase.body["error"], "bad_gateway");

    let mine = app.get("/memberships/me", Some(&member)).await;
    assert_eq!(mine.body["memberships"][0]["status"], "cancelled");
}

#[tokio::test]
async fn test_free_purchase_skips_the_gateway() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("free@example.com").await;
    let plan = app.plan(&admin, "Trial", 7, 1_000).await;
    let promo = app
        .post(
            "/promotions",
            Some(&admin),
            json!({
                "code": "trialfree",
                "discount": {"type": "percent", "value": 100},
                "scope": "memberships",
                "starts_at": t0() - Duration::days(1),
                "ends_at": t0() + Duration::days(30),
                "max_redemptions": 1,
            }),
        )
        .await;
    assert_eq!(promo.status, StatusCode::CREATED, "{:?}", promo.body);
    assert_eq!(promo.body["code"], "TRIALFREE");

    let purchase = app
        .post(
            "/memberships/purchase",
            Some(&member),
            json!({"plan_id": plan, "promo_code": "TrialFree"}),
        )
        .await;
    assert_eq!(purchase.status, StatusCode::CREATED, "{:?}", purchase.body);
    assert!(purchase.body["checkout_url"].is_null());
    assert_eq!(purchase.body["payment"]["amount_cents"], 0);
    assert_eq!(purchase.body["payment"]["status"], "paid");
    assert_eq!(purchase.body["membership"]["status"], "active");
    assert!(app.gateway.requests.lock().unwrap().is_empty());

    // Single use: the next buyer hits the cap
    let other = app.member("late-free@example.com").await;
    let exhausted = app
        .post(
            "/memberships/purchase",
            Some(&other),
            json!({"plan_id": plan, "promo_code": "TRIALFREE"}),
        )
        .await;
    assert_eq!(exhausted.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signatures() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("sig@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;
    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;
    let body = json!({
        "reference": purchase.body["payment"]["reference"],
        "status": "paid",
        "amount_cents": 4_900,
    })
    .to_string();

    let deliver = |timestamp: i64, signature: String| {
        Request::builder()
            .method(Method::POST)
            .uri("/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.clone()))
            .unwrap()
    };
    let now = app.clock_now().timestamp();

    let wrong_secret = app
        .send(deliver(now, webhook::sign("not-the-secret", now, body.as_bytes())))
        .await;
    assert_eq!(wrong_secret.status, StatusCode::UNAUTHORIZED);

    let stale_ts = now - 301;
    let stale = app
        .send(deliver(stale_ts, webhook::sign(WEBHOOK_SECRET, stale_ts, body.as_bytes())))
        .await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);

    let extreme = app.send(deliver(i64::MIN, "sha256=00".to_string())).await;
    assert_eq!(extreme.status, StatusCode::UNAUTHORIZED);

    let unsigned = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/payments/webhook")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(unsigned.status, StatusCode::UNAUTHORIZED);

    // Nothing was applied
    let mine = app.get("/memberships/me", Some(&member)).await;
    assert_eq!(mine.body["memberships"][0]["status"], "pending_payment");
}

#[tokio::test]
async fn test_webhook_amount_mismatch_and_unknown_reference() {
    let app = TestApp::new();
    let admin = app.admin().await;
    let member = app.member("mismatch@example.com").await;
    let plan = app.plan(&admin, "Monthly", 30, 4_900).await;
    let purchase = app
        .post("/memberships/purchase", Some(&member), json!({"plan_id": plan}))
        .await;

    let short = app
        .webhook(json!({
            "reference": purchase.body["payment"]["reference"],
            "status": "paid",
            "amount_cents": 100,
        }))
        .await;
    assert_eq!(short.status, StatusCode::UNPROCESSABLE_ENTITY);

    let unknown = app
        .webhook(json!({"reference": "GYM-unknown", "status": "paid", "amount_cents": 100}))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let payment_id = purchase.body["payment"]["id"].as_str().unwrap();
    let payment = app.get(&format!("/payments/{payment_id}"), Some(&member)).await;
    assert_eq!(payment.body["status"], "pending");
}
