// src/api/webhooks.rs
//
// Payment-gateway confirmations. Deliveries are at-least-once, so the
// handler replies 200 for replays and unknown references; anything else
// makes the gateway retry forever.

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::LedgerError;
use crate::ledger::{self, GatewayOutcome};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct GatewayWebhook {
    #[serde(alias = "orderId", alias = "order_id")]
    pub reference: String,

    pub status: Option<String>,

    pub paid: Option<bool>,

    #[serde(alias = "userId")]
    pub user_id: i32,

    #[serde(alias = "cycleId", alias = "tandaId")]
    pub cycle_id: i32,

    pub amount: f64,

    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Value,
}

pub fn is_succeeded(payload: &GatewayWebhook) -> bool {
    if payload.paid.unwrap_or(false) {
        return true;
    }
    matches!(
        payload.status.as_deref(),
        Some("succeeded") | Some("success") | Some("paid") | Some("approved")
    )
}

pub fn is_failed(payload: &GatewayWebhook) -> bool {
    matches!(
        payload.status.as_deref(),
        Some("failed") | Some("fail") | Some("canceled") | Some("rejected")
    )
}

/// The shared key may arrive as a header or inside the payload, depending on
/// how the gateway is configured.
pub fn extract_api_key(req: &HttpRequest, payload: &GatewayWebhook) -> Option<String> {
    if let Some(key) = req
        .headers()
        .get("X-Api-Key")
        .and_then(|h| h.to_str().ok())
    {
        return Some(key.to_string());
    }
    payload
        .extra
        .get("api_key")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[utoipa::path(
    post,
    path = "/webhook/payment-gateway",
    tag = "webhooks",
    request_body = GatewayWebhook,
    responses(
        (status = 200, description = "Confirmation processed (or acknowledged replay)"),
        (status = 401, description = "Bad webhook key"),
        (status = 500, description = "Server error")
    )
)]
#[post("/webhook/payment-gateway")]
pub async fn payment_gateway_webhook(
    req: HttpRequest,
    payload: web::Json<GatewayWebhook>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let payload = payload.into_inner();

    if !state.gateway_webhook_key.is_empty() {
        let presented = extract_api_key(&req, &payload);
        if presented.as_deref() != Some(state.gateway_webhook_key.as_str()) {
            log::warn!(
                "gateway webhook rejected: bad key for reference {}",
                payload.reference
            );
            return HttpResponse::Unauthorized().finish();
        }
    }

    if is_failed(&payload) {
        log::info!(
            "gateway reported failure for reference {}, nothing recorded",
            payload.reference
        );
        return HttpResponse::Ok().json(serde_json::json!({"ok": true, "ignored": true}));
    }

    if !is_succeeded(&payload) {
        // unknown status, still 200
        return HttpResponse::Ok().json(serde_json::json!({"ok": true, "ignored": true}));
    }

    match ledger::record_gateway_payment(
        &state.pool,
        &state.notifier,
        payload.user_id,
        payload.cycle_id,
        payload.amount,
        &payload.reference,
    )
    .await
    {
        Ok(GatewayOutcome::Recorded(payment)) => {
            log::info!(
                "gateway payment recorded reference={} payment_id={}",
                payload.reference,
                payment.id
            );
            HttpResponse::Ok().json(serde_json::json!({"ok": true}))
        }
        Ok(GatewayOutcome::AlreadyProcessed) => {
            HttpResponse::Ok().json(serde_json::json!({"ok": true, "idempotent": true}))
        }
        Err(LedgerError::NotFound(_)) => {
            // unknown cycle: acknowledged so the gateway stops retrying
            HttpResponse::Ok().json(serde_json::json!({"ok": true, "ignored": true}))
        }
        Err(e) => {
            eprintln!("gateway webhook error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
