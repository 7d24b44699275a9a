// src/api/payments.rs

use actix_multipart::Multipart;
use actix_web::{get, patch, post, web, HttpResponse, Responder};
use aws_sdk_s3::primitives::ByteStream;
use futures_util::StreamExt;
use serde_json::json;
use sqlx::Row;

use crate::error::LedgerError;
use crate::models::PaymentStatus;
use crate::s3_utils::{build_public_url, receipt_key};
use crate::{db, ledger, AppState};

/// Maps ledger failures to the responses the panel expects.
fn ledger_error_response(err: LedgerError) -> HttpResponse {
    match err {
        LedgerError::Validation(message) => {
            HttpResponse::BadRequest().json(json!({"message": message}))
        }
        LedgerError::NoPendingDueDate => HttpResponse::BadRequest()
            .json(json!({"message": "Ya no tienes fechas pendientes de pago."})),
        LedgerError::NotFound(what) => {
            let message = match what {
                "cycle" => "Tanda no encontrada.",
                "payment" => "Pago no encontrado.",
                _ => "No encontrado.",
            };
            HttpResponse::NotFound().json(json!({"message": message}))
        }
        LedgerError::DuplicatePayment => HttpResponse::Conflict()
            .json(json!({"message": "Ya existe un pago registrado para esta fecha."})),
        LedgerError::Database(e) => {
            eprintln!("ledger db error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Registers a manual payment: multipart form with `cycle_id`, `amount` and
/// an optional `receipt` image. The receipt goes to S3 and through OCR; the
/// resulting classification decides the stored status.
#[utoipa::path(
    post,
    path = "/api/payments",
    tag = "payments",
    responses(
        (status = 200, description = "Payment recorded with its OCR classification"),
        (status = 400, description = "Missing fields or no pending due date"),
        (status = 404, description = "Cycle not found"),
        (status = 409, description = "A settled payment already exists for the due date")
    )
)]
#[post("/payments")]
pub async fn submit_payment(
    mut payload: Multipart,
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> impl Responder {
    let user_id = user_id.into_inner();

    let mut cycle_id: Option<i32> = None;
    let mut amount: Option<f64> = None;
    let mut file_bytes: Vec<u8> = Vec::new();
    let mut original_filename = "comprobante.jpg".to_string();

    while let Some(item) = payload.next().await {
        let mut field = match item {
            Ok(f) => f,
            Err(_) => continue,
        };

        let cd = field.content_disposition();
        let name = cd.get_name().unwrap_or("").to_string();
        if name == "receipt" {
            if let Some(filename) = cd.get_filename() {
                original_filename = crate::s3_utils::sanitize(filename);
            }
            while let Some(chunk) = field.next().await {
                if let Ok(data) = chunk {
                    file_bytes.extend_from_slice(&data);
                }
            }
            continue;
        }

        // text fields
        let mut value_bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.next().await {
            if let Ok(data) = chunk {
                value_bytes.extend_from_slice(&data);
            }
        }
        let value = String::from_utf8_lossy(&value_bytes).trim().to_string();
        match name.as_str() {
            "cycle_id" => cycle_id = value.parse().ok(),
            "amount" => amount = value.parse().ok(),
            _ => {}
        }
    }

    let (Some(cycle_id), Some(amount)) = (cycle_id, amount) else {
        return HttpResponse::BadRequest().json(json!({"message": "Faltan datos obligatorios."}));
    };

    let receipt_url = if file_bytes.is_empty() {
        None
    } else {
        let key = receipt_key(user_id, &original_filename);

        if std::env::var("MOCK_S3").unwrap_or_default() != "true" {
            let stream = ByteStream::from(file_bytes);
            if let Err(e) = state
                .s3_client
                .put_object()
                .bucket(&state.s3_bucket)
                .key(&key)
                .content_type("image/jpeg")
                .body(stream)
                .send()
                .await
            {
                eprintln!("receipt s3 upload error: {e}");
                return HttpResponse::InternalServerError().body("Failed to save receipt");
            }
        }

        Some(build_public_url(
            &state.s3_public_base_url,
            &state.s3_bucket,
            &key,
        ))
    };

    match ledger::submit_receipt_payment(
        &state.pool,
        &state.ocr,
        &state.notifier,
        user_id,
        cycle_id,
        amount,
        receipt_url,
    )
    .await
    {
        Ok(submitted) => HttpResponse::Ok().json(json!({
            "message": submitted.message,
            "pago": submitted.payment,
        })),
        Err(e) => ledger_error_response(e),
    }
}

/// Admin panel: every payment with the payer and cycle context.
#[get("/payments")]
pub async fn list_payments(state: web::Data<AppState>) -> impl Responder {
    let rows = match sqlx::query(
        r#"SELECT p.id, p.user_id, p.cycle_id, p.amount, p.due_date, p.status,
                  p.late, p.penalty, p.receipt_url, p.ocr_message, p.method,
                  p.gateway_reference, p.created_at,
                  u.name AS user_name, u.email AS user_email,
                  c.amount AS cycle_amount, c.cadence AS cycle_cadence
           FROM payments p
           JOIN users u ON u.id = p.user_id
           JOIN cycles c ON c.id = p.cycle_id
           ORDER BY p.created_at DESC"#,
    )
    .fetch_all(&state.pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("list_payments error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let payments: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "id": r.get::<i32, _>("id"),
                "user_id": r.get::<i32, _>("user_id"),
                "cycle_id": r.get::<i32, _>("cycle_id"),
                "amount": r.get::<f64, _>("amount"),
                "due_date": r.get::<chrono::NaiveDate, _>("due_date"),
                "status": r.get::<String, _>("status"),
                "late": r.get::<bool, _>("late"),
                "penalty": r.get::<f64, _>("penalty"),
                "receipt_url": r.get::<Option<String>, _>("receipt_url"),
                "ocr_message": r.get::<Option<String>, _>("ocr_message"),
                "method": r.get::<String, _>("method"),
                "gateway_reference": r.get::<Option<String>, _>("gateway_reference"),
                "created_at": r.get::<Option<chrono::DateTime<chrono::Utc>>, _>("created_at"),
                "user_name": r.get::<String, _>("user_name"),
                "user_email": r.get::<String, _>("user_email"),
                "cycle_amount": r.get::<f64, _>("cycle_amount"),
                "cycle_cadence": r.get::<String, _>("cycle_cadence"),
            })
        })
        .collect();

    HttpResponse::Ok().json(payments)
}

#[get("/payments/mine")]
pub async fn my_payments(state: web::Data<AppState>, user_id: web::ReqData<i32>) -> impl Responder {
    match db::list_payments_for_user(&state.pool, *user_id).await {
        Ok(payments) if payments.is_empty() => HttpResponse::NotFound()
            .json(json!({"message": "No se encontraron pagos para este usuario."})),
        Ok(payments) => HttpResponse::Ok().json(payments),
        Err(e) => {
            eprintln!("my_payments error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Earliest pending due date across the caller's cycles; also serves the
/// watch and voice-assistant clients.
#[get("/payments/next-due")]
pub async fn next_due(state: web::Data<AppState>, user_id: web::ReqData<i32>) -> impl Responder {
    match ledger::next_due_for_user(&state.pool, *user_id).await {
        Ok(Some(next)) => HttpResponse::Ok().json(next),
        Ok(None) => {
            HttpResponse::NotFound().json(json!({"message": "No hay fechas pendientes."}))
        }
        Err(e) => {
            eprintln!("next_due error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/payments/dashboard")]
pub async fn dashboard(state: web::Data<AppState>) -> impl Responder {
    match ledger::dashboard_totals(&state.pool).await {
        Ok(totals) => HttpResponse::Ok().json(totals),
        Err(e) => {
            eprintln!("dashboard error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[patch("/payments/{payment_id}/approve")]
pub async fn approve_payment(state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    match ledger::set_status(
        &state.pool,
        &state.notifier,
        path.into_inner(),
        PaymentStatus::Approved,
    )
    .await
    {
        Ok(payment) => HttpResponse::Ok().json(json!({
            "message": "Pago aprobado correctamente.",
            "pago": payment,
        })),
        Err(LedgerError::NotFound(_)) => {
            HttpResponse::NotFound().json(json!({"message": "Pago no encontrado."}))
        }
        Err(e) => ledger_error_response(e),
    }
}

#[patch("/payments/{payment_id}/reject")]
pub async fn reject_payment(state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    match ledger::set_status(
        &state.pool,
        &state.notifier,
        path.into_inner(),
        PaymentStatus::Rejected,
    )
    .await
    {
        Ok(payment) => HttpResponse::Ok().json(json!({
            "message": "Pago rechazado correctamente.",
            "pago": payment,
        })),
        Err(LedgerError::NotFound(_)) => {
            HttpResponse::NotFound().json(json!({"message": "Pago no encontrado."}))
        }
        Err(e) => ledger_error_response(e),
    }
}
