// src/api/notifications.rs

use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use crate::{db, AppState};

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    pub user_id: i32,
    pub cycle_id: i32,
    pub due_date: NaiveDate,
}

/// In-app feed for the calling user.
#[get("/notifications/mine")]
pub async fn my_notifications(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
) -> impl Responder {
    match db::list_notifications_for_user(&state.pool, *user_id).await {
        Ok(notifications) => HttpResponse::Ok().json(notifications),
        Err(e) => {
            eprintln!("my_notifications error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Imperative reminder trigger. There is no scheduler; an admin decides when
/// reminders go out, so this one is awaited and the result reported back.
#[post("/notifications/reminder")]
pub async fn send_reminder(
    state: web::Data<AppState>,
    payload: web::Json<ReminderRequest>,
) -> impl Responder {
    let user = match db::get_user(&state.pool, payload.user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({"message": "Usuario o tanda no encontrados"}))
        }
        Err(e) => {
            eprintln!("reminder user lookup error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let cycle = match db::get_cycle(&state.pool, payload.cycle_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::NotFound()
                .json(json!({"message": "Usuario o tanda no encontrados"}))
        }
        Err(e) => {
            eprintln!("reminder cycle lookup error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    state
        .notifier
        .payment_reminder(&user, &cycle, payload.due_date)
        .await;

    HttpResponse::Ok().json(json!({"message": "Recordatorio enviado correctamente"}))
}
