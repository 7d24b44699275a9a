use actix_web::test::TestRequest;
use actix_web::{test, web, App};
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use gias_backend::api::auth::{generate_jwt, AuthMiddleware};
use gias_backend::api::cycles::reorder_participants;
use gias_backend::api::payments::submit_payment;
use gias_backend::api::webhooks::payment_gateway_webhook;
use gias_backend::models::PaymentStatus;
use gias_backend::notify::Notifier;
use gias_backend::ocr::OcrClient;
use gias_backend::{db, ledger};

mod support;

fn multipart_body(cycle_id: i32, amount: &str) -> (String, String) {
    let boundary = "----gias-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"cycle_id\"\r\n\r\n\
         {cycle_id}\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"amount\"\r\n\r\n\
         {amount}\r\n\
         --{boundary}--\r\n"
    );
    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}

#[actix_web::test]
async fn duplicate_gateway_webhook_creates_single_payment() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().simple().to_string();

    let payer = support::insert_user(pool, &format!("payer_{suffix}")).await;
    let receiver = support::insert_user(pool, &format!("recv_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, payer, 1).await;
    support::insert_participant(pool, cycle_id, receiver, 2).await;
    support::generate_schedule(pool, cycle_id).await;

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "").await);
    let app =
        test::init_service(App::new().app_data(state.clone()).service(payment_gateway_webhook))
            .await;

    let reference = format!("gw-{suffix}");
    let payload = json!({
        "reference": reference,
        "status": "succeeded",
        "user_id": payer,
        "cycle_id": cycle_id,
        "amount": 500.0,
    });

    for _ in 0..2 {
        let req = TestRequest::post()
            .uri("/webhook/payment-gateway")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    let count: i64 = sqlx::query(
        r#"SELECT COUNT(*) AS n FROM payments
           WHERE user_id = $1 AND cycle_id = $2 AND method = 'gateway'"#,
    )
    .bind(payer)
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("count payments")
    .get("n");
    assert_eq!(count, 1);

    let status: String = sqlx::query(
        "SELECT status FROM payments WHERE user_id = $1 AND cycle_id = $2",
    )
    .bind(payer)
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("select payment")
    .get("status");
    assert_eq!(status, "approved");
}

#[actix_web::test]
async fn submission_with_no_pending_dates_is_refused() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    std::env::set_var("JWT_SECRET", "test-secret");
    let suffix = Uuid::new_v4().simple().to_string();

    support::insert_destination_account(pool).await;
    let payer = support::insert_user(pool, &format!("payer_{suffix}")).await;
    let receiver = support::insert_user(pool, &format!("recv_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, payer, 1).await;
    support::insert_participant(pool, cycle_id, receiver, 2).await;
    support::generate_schedule(pool, cycle_id).await;

    // consume the payer's only due date
    sqlx::query(
        r#"INSERT INTO payments (user_id, cycle_id, amount, due_date, status, method)
           VALUES ($1, $2, 500, '2024-01-14'::date, 'approved', 'receipt')"#,
    )
    .bind(payer)
    .bind(cycle_id)
    .execute(pool)
    .await
    .expect("insert payment");

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "").await);
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(AuthMiddleware)
                .service(submit_payment),
        ),
    )
    .await;

    let token = generate_jwt(payer).expect("jwt");
    let (content_type, body) = multipart_body(cycle_id, "500");
    let req = TestRequest::post()
        .uri("/api/payments")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    // nothing new was written
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM payments WHERE user_id = $1 AND cycle_id = $2",
    )
    .bind(payer)
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("count payments")
    .get("n");
    assert_eq!(count, 1);
}

#[actix_web::test]
async fn receiptless_submission_is_stored_for_manual_review() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    std::env::set_var("JWT_SECRET", "test-secret");
    let suffix = Uuid::new_v4().simple().to_string();

    support::insert_destination_account(pool).await;
    let payer = support::insert_user(pool, &format!("payer_{suffix}")).await;
    let receiver = support::insert_user(pool, &format!("recv_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, payer, 1).await;
    support::insert_participant(pool, cycle_id, receiver, 2).await;
    support::generate_schedule(pool, cycle_id).await;

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "").await);
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(AuthMiddleware)
                .service(submit_payment),
        ),
    )
    .await;

    let token = generate_jwt(payer).expect("jwt");
    let (content_type, body) = multipart_body(cycle_id, "500");
    let req = TestRequest::post()
        .uri("/api/payments")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let row = sqlx::query(
        r#"SELECT status, due_date, ocr_message FROM payments
           WHERE user_id = $1 AND cycle_id = $2"#,
    )
    .bind(payer)
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("select payment");

    let status: String = row.get("status");
    let due_date: chrono::NaiveDate = row.get("due_date");
    let ocr_message: Option<String> = row.get("ocr_message");

    assert_eq!(status, "pending");
    assert_eq!(due_date.to_string(), "2024-01-14");
    assert!(ocr_message.unwrap_or_default().contains("revisión manual"));
}

#[actix_web::test]
async fn rejected_payment_retries_the_same_due_date() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().simple().to_string();

    support::insert_destination_account(pool).await;
    let payer = support::insert_user(pool, &format!("payer_{suffix}")).await;
    let second = support::insert_user(pool, &format!("second_{suffix}")).await;
    let third = support::insert_user(pool, &format!("third_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, payer, 1).await;
    support::insert_participant(pool, cycle_id, second, 2).await;
    support::insert_participant(pool, cycle_id, third, 3).await;
    support::generate_schedule(pool, cycle_id).await;

    // the payer owes on 2024-01-14 and 2024-01-21; the first attempt on the
    // 14th was rejected by an admin
    sqlx::query(
        r#"INSERT INTO payments (user_id, cycle_id, amount, due_date, status, method)
           VALUES ($1, $2, 500, '2024-01-14'::date, 'rejected', 'receipt')"#,
    )
    .bind(payer)
    .bind(cycle_id)
    .execute(pool)
    .await
    .expect("insert rejected payment");

    let ocr = OcrClient::new(String::new(), String::new());
    let notifier = Notifier::from_env(test_db.pool.clone());
    let submitted =
        ledger::submit_receipt_payment(pool, &ocr, &notifier, payer, cycle_id, 500.0, None)
            .await
            .expect("submission succeeds");

    assert_eq!(submitted.payment.due_date.to_string(), "2024-01-14");
    assert_eq!(submitted.payment.status, PaymentStatus::Pending);

    // both attempts stay in the ledger for audit
    let count: i64 = sqlx::query(
        r#"SELECT COUNT(*) AS n FROM payments
           WHERE user_id = $1 AND cycle_id = $2 AND due_date = '2024-01-14'::date"#,
    )
    .bind(payer)
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("count payments")
    .get("n");
    assert_eq!(count, 2);
}

#[actix_web::test]
async fn stale_reorder_version_is_rejected() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    std::env::set_var("JWT_SECRET", "test-secret");
    let suffix = Uuid::new_v4().simple().to_string();

    let admin = support::insert_user(pool, &format!("admin_{suffix}")).await;
    let first = support::insert_user(pool, &format!("first_{suffix}")).await;
    let second = support::insert_user(pool, &format!("second_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, first, 1).await;
    support::insert_participant(pool, cycle_id, second, 2).await;
    support::generate_schedule(pool, cycle_id).await;

    let participant_id: i32 = sqlx::query(
        "SELECT id FROM participants WHERE cycle_id = $1 AND user_id = $2",
    )
    .bind(cycle_id)
    .bind(first)
    .fetch_one(pool)
    .await
    .expect("participant id")
    .get("id");

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "").await);
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(AuthMiddleware)
                .service(reorder_participants),
        ),
    )
    .await;

    let token = generate_jwt(admin).expect("jwt");
    let req = TestRequest::patch()
        .uri(&format!("/api/cycles/{cycle_id}/reorder"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({
            "version": 999,
            "participants": [{"participant_id": participant_id, "turn_order": 2}],
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 409);
}

#[actix_web::test]
async fn reorder_rewrites_orders_and_schedule() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    std::env::set_var("JWT_SECRET", "test-secret");
    let suffix = Uuid::new_v4().simple().to_string();

    let admin = support::insert_user(pool, &format!("admin_{suffix}")).await;
    let first = support::insert_user(pool, &format!("first_{suffix}")).await;
    let second = support::insert_user(pool, &format!("second_{suffix}")).await;
    let cycle_id = support::insert_cycle(pool, 500.0, "2024-01-07").await;
    support::insert_participant(pool, cycle_id, first, 1).await;
    support::insert_participant(pool, cycle_id, second, 2).await;
    support::generate_schedule(pool, cycle_id).await;

    let cycle = db::get_cycle(pool, cycle_id)
        .await
        .expect("get cycle")
        .expect("cycle exists");

    let slots = db::schedule_slots(pool, cycle_id).await.expect("slots");
    let first_pid = slots.iter().find(|s| s.user_id == first).unwrap().participant_id;
    let second_pid = slots
        .iter()
        .find(|s| s.user_id == second)
        .unwrap()
        .participant_id;

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "").await);
    let app = test::init_service(
        App::new().app_data(state.clone()).service(
            web::scope("/api")
                .wrap(AuthMiddleware)
                .service(reorder_participants),
        ),
    )
    .await;

    let token = generate_jwt(admin).expect("jwt");
    let req = TestRequest::patch()
        .uri(&format!("/api/cycles/{cycle_id}/reorder"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({
            "version": cycle.version,
            "participants": [
                {"participant_id": first_pid, "turn_order": 2},
                {"participant_id": second_pid, "turn_order": 1},
                // a duplicated entry is silently dropped
                {"participant_id": first_pid, "turn_order": 1},
            ],
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    // the second user now receives the pot in turn 0
    let receiver: i32 = sqlx::query(
        r#"SELECT user_id FROM schedule_entries
           WHERE cycle_id = $1 AND turn_index = 0 AND receipt_date IS NOT NULL"#,
    )
    .bind(cycle_id)
    .fetch_one(pool)
    .await
    .expect("turn 0 receiver")
    .get("user_id");
    assert_eq!(receiver, second);

    let fresh = db::get_cycle(pool, cycle_id)
        .await
        .expect("get cycle")
        .expect("cycle exists");
    assert_eq!(fresh.version, cycle.version + 1);
}

#[actix_web::test]
async fn oauth_code_is_single_use_and_expires() {
    let Some(test_db) = support::try_init_test_db().await else {
        return;
    };
    let pool = &test_db.pool;
    let suffix = Uuid::new_v4().simple().to_string();

    let user = support::insert_user(pool, &format!("voice_{suffix}")).await;

    let code = format!("code-{suffix}");
    db::insert_auth_code(pool, &code, user, 300)
        .await
        .expect("insert code");

    let consumed = db::consume_auth_code(pool, &code).await.expect("consume");
    assert_eq!(consumed, Some(user));

    let replay = db::consume_auth_code(pool, &code).await.expect("replay");
    assert_eq!(replay, None);

    // an expired code is never handed out
    let stale = format!("stale-{suffix}");
    db::insert_auth_code(pool, &stale, user, -10)
        .await
        .expect("insert stale code");
    let expired = db::consume_auth_code(pool, &stale).await.expect("expired");
    assert_eq!(expired, None);
}
