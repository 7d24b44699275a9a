// src/api/accounts.rs
//
// The destination account is the single bank account receiving manual
// transfers; OCR reconciliation validates receipts against it.

use actix_web::{get, put, web, HttpResponse, Responder};
use serde_json::json;

use crate::models::DestinationAccount;
use crate::{db, AppState};

#[get("/destination-account")]
pub async fn get_destination_account(state: web::Data<AppState>) -> impl Responder {
    match db::destination_account(&state.pool).await {
        Ok(Some(account)) => HttpResponse::Ok().json(account),
        Ok(None) => HttpResponse::NotFound()
            .json(json!({"message": "No hay cuenta destino registrada."})),
        Err(e) => {
            eprintln!("destination account error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[put("/destination-account")]
pub async fn put_destination_account(
    state: web::Data<AppState>,
    payload: web::Json<DestinationAccount>,
) -> impl Responder {
    if payload.titleholder.trim().is_empty()
        || payload.account_number.trim().is_empty()
        || payload.bank.trim().is_empty()
    {
        return HttpResponse::BadRequest().json(json!({"message": "Faltan datos obligatorios."}));
    }

    match db::upsert_destination_account(&state.pool, &payload).await {
        Ok(account) => HttpResponse::Ok().json(json!({
            "message": "Cuenta destino actualizada correctamente.",
            "cuenta": account,
        })),
        Err(e) => {
            eprintln!("destination account upsert error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
