// src/api/oauth.rs
//
// OAuth 2.0 account linking for the voice assistant, plus the 6-digit PIN
// pairing flow. Authorization codes live in the database with a 5-minute
// TTL and are consumed atomically (delete-returning), so a code can only
// ever be exchanged once, even by two concurrent token requests.

use actix_web::{post, web, HttpResponse, Responder};
use bcrypt::verify;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;
use uuid::Uuid;

use crate::{db, AppState};

const AUTH_CODE_TTL_SECONDS: i64 = 5 * 60;
const ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub email: String,
    pub password: String,
    pub state: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidatePinRequest {
    pub pin: String,
}

/// Credentials in, single-use authorization code out.
#[post("/oauth/authorize")]
pub async fn authorize(
    state: web::Data<AppState>,
    payload: web::Json<AuthorizeRequest>,
) -> impl Responder {
    let row = match sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&state.pool)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("oauth authorize db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let Some(row) = row else {
        return HttpResponse::Unauthorized()
            .json(json!({"error": "Credenciales incorrectas"}));
    };

    let user_id: i32 = row.get("id");
    let password_hash: String = row.get("password_hash");

    match verify(&payload.password, &password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Unauthorized()
                .json(json!({"error": "Credenciales incorrectas"}));
        }
        Err(e) => {
            eprintln!("bcrypt verify error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let code = Uuid::new_v4().simple().to_string();
    if let Err(e) = db::insert_auth_code(&state.pool, &code, user_id, AUTH_CODE_TTL_SECONDS).await
    {
        eprintln!("auth code insert error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    let redirect = payload.redirect_uri.as_deref().map(|uri| {
        format!(
            "{uri}?code={code}&state={}",
            payload.state.as_deref().unwrap_or("")
        )
    });

    HttpResponse::Ok().json(json!({"code": code, "redirect": redirect}))
}

/// Authorization-code exchange, posted as a form per OAuth 2.0.
#[post("/oauth/token")]
pub async fn token(
    state: web::Data<AppState>,
    payload: web::Form<TokenRequest>,
) -> impl Responder {
    let client_id = std::env::var("VOICE_CLIENT_ID").unwrap_or_default();
    let client_secret = std::env::var("VOICE_CLIENT_SECRET").unwrap_or_default();

    if payload.client_id != client_id || payload.client_secret != client_secret {
        return HttpResponse::BadRequest().json(json!({"error": "invalid_client"}));
    }

    if payload.grant_type != "authorization_code" {
        return HttpResponse::BadRequest().json(json!({"error": "unsupported_grant_type"}));
    }

    let user_id = match db::consume_auth_code(&state.pool, &payload.code).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return HttpResponse::BadRequest().json(json!({"error": "invalid_grant"})),
        Err(e) => {
            eprintln!("auth code consume error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let access_token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    if let Err(e) =
        db::insert_access_token(&state.pool, &access_token, user_id, ACCESS_TOKEN_TTL_SECONDS)
            .await
    {
        eprintln!("access token insert error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    log::info!("voice access token issued for user {user_id}");

    HttpResponse::Ok().json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": ACCESS_TOKEN_TTL_SECONDS,
    }))
}

/// Generates the pairing PIN the user reads out to the assistant.
#[post("/voice/pin/{user_id}")]
pub async fn generate_voice_pin(
    state: web::Data<AppState>,
    path: web::Path<i32>,
) -> impl Responder {
    let user_id = path.into_inner();
    let pin = format!("{}", rand::thread_rng().gen_range(100000..=999999));

    match db::set_voice_pin(&state.pool, user_id, &pin).await {
        Ok(true) => HttpResponse::Ok().json(json!({"pin": pin})),
        Ok(false) => {
            HttpResponse::NotFound().json(json!({"message": "Usuario no encontrado"}))
        }
        Err(e) => {
            eprintln!("voice pin error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[post("/voice/pin/validate")]
pub async fn validate_voice_pin(
    state: web::Data<AppState>,
    payload: web::Json<ValidatePinRequest>,
) -> impl Responder {
    match db::find_user_by_voice_pin(&state.pool, &payload.pin).await {
        Ok(Some((user_id, name))) => HttpResponse::Ok().json(json!({
            "success": true,
            "user_id": user_id,
            "nombre": name,
        })),
        Ok(None) => HttpResponse::BadRequest()
            .json(json!({"success": false, "message": "PIN inválido"})),
        Err(e) => {
            eprintln!("voice pin validate error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
