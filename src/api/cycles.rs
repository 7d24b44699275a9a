// src/api/cycles.rs
//
// Savings-circle routes: join-or-create, admin reorder, start-date
// definition (which freezes the schedule) and the panel queries.

use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;

use crate::models::{Cadence, Cycle};
use crate::schedule;
use crate::{db, AppState};

#[derive(Debug, Deserialize)]
pub struct JoinCycleRequest {
    pub amount: f64,
    pub cadence: Cadence,
    /// How many slots the user takes; defaults to one.
    pub slots: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ReorderEntry {
    pub participant_id: i32,
    pub turn_order: i32,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub version: i32,
    pub participants: Vec<ReorderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct StartDateRequest {
    pub start_date: NaiveDate,
    pub version: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TurnsRequest {
    pub total_turns: i32,
}

async fn cycle_with_participants(
    pool: &sqlx::PgPool,
    cycle: &Cycle,
) -> Result<serde_json::Value, sqlx::Error> {
    let participants = db::list_participants(pool, cycle.id).await?;
    let schedule = db::list_schedule_entries(pool, cycle.id).await?;
    let remaining = cycle.total_turns as i64 - participants.len() as i64;
    Ok(json!({
        "cycle": cycle,
        "participants": participants,
        "schedule": schedule,
        "remaining_slots": remaining,
    }))
}

/// Join the open cycle for an amount + cadence combination, creating it when
/// none exists yet.
#[post("/cycles")]
pub async fn join_cycle(
    state: web::Data<AppState>,
    user_id: web::ReqData<i32>,
    payload: web::Json<JoinCycleRequest>,
) -> impl Responder {
    let user_id = *user_id;
    let slots = payload.slots.unwrap_or(1).max(1);

    if payload.amount <= 0.0 {
        return HttpResponse::BadRequest().json(json!({"message": "Faltan datos obligatorios."}));
    }

    let existing = match db::find_open_cycle(&state.pool, payload.amount, payload.cadence).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("find_open_cycle error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let (cycle, created) = match existing {
        Some(cycle) => (cycle, false),
        None => {
            let row = match sqlx::query(
                r#"INSERT INTO cycles (amount, cadence)
                   VALUES ($1, $2)
                   RETURNING id"#,
            )
            .bind(payload.amount)
            .bind(payload.cadence.as_str())
            .fetch_one(&state.pool)
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("create cycle error: {e}");
                    return HttpResponse::InternalServerError().finish();
                }
            };
            let id: i32 = row.get("id");
            match db::get_cycle(&state.pool, id).await {
                Ok(Some(c)) => (c, true),
                _ => return HttpResponse::InternalServerError().finish(),
            }
        }
    };

    let current = match db::count_participants(&state.pool, cycle.id).await {
        Ok(n) => n,
        Err(e) => {
            eprintln!("count_participants error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if current + slots as i64 > cycle.total_turns as i64 {
        return HttpResponse::BadRequest()
            .json(json!({"message": "No hay lugares suficientes disponibles."}));
    }

    if !created {
        let already = match sqlx::query(
            "SELECT 1 AS hit FROM participants WHERE cycle_id = $1 AND user_id = $2 LIMIT 1",
        )
        .bind(cycle.id)
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await
        {
            Ok(r) => r.is_some(),
            Err(e) => {
                eprintln!("membership check error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        };
        if already {
            return HttpResponse::BadRequest()
                .json(json!({"message": "El usuario ya está en esta tanda."}));
        }
    }

    for i in 0..slots {
        if let Err(e) = sqlx::query(
            r#"INSERT INTO participants (cycle_id, user_id, turn_order)
               VALUES ($1, $2, $3)"#,
        )
        .bind(cycle.id)
        .bind(user_id)
        .bind(current as i32 + 1 + i)
        .execute(&state.pool)
        .await
        {
            eprintln!("insert participant error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    // full recompute; skipped while the start date is undefined
    if let Err(e) = db::regenerate_schedule(&state.pool, &cycle).await {
        eprintln!("schedule recompute error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    let message = if created {
        "Tanda creada exitosamente."
    } else {
        "Te uniste a la tanda exitosamente."
    };

    match db::get_cycle(&state.pool, cycle.id).await {
        Ok(Some(fresh)) => match cycle_with_participants(&state.pool, &fresh).await {
            Ok(body) => HttpResponse::Ok().json(json!({"message": message, "tanda": body})),
            Err(e) => {
                eprintln!("cycle response error: {e}");
                HttpResponse::InternalServerError().finish()
            }
        },
        _ => HttpResponse::InternalServerError().finish(),
    }
}

/// Admin reorder of the turn sequence. De-duplicates by membership id,
/// silently dropping repeated entries, and rewrites the whole schedule.
/// The request carries the cycle version it was based on; stale writers get
/// a 409 instead of last-write-wins.
#[patch("/cycles/{cycle_id}/reorder")]
pub async fn reorder_participants(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<ReorderRequest>,
) -> impl Responder {
    let cycle_id = path.into_inner();

    let cycle = match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"message": "Tanda no encontrada."}))
        }
        Err(e) => {
            eprintln!("get_cycle error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // drop duplicated membership ids before touching anything
    let mut seen = std::collections::HashSet::new();
    let mut requested: Vec<&ReorderEntry> = Vec::new();
    for entry in &payload.participants {
        if seen.insert(entry.participant_id) {
            requested.push(entry);
        }
    }

    let mut slots = match db::schedule_slots(&state.pool, cycle_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("schedule_slots error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // unknown ids are ignored; members missing from the request keep their order
    for entry in &requested {
        if let Some(slot) = slots
            .iter_mut()
            .find(|s| s.participant_id == entry.participant_id)
        {
            slot.turn_order = entry.turn_order;
        }
    }

    let mut tx = match state.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            eprintln!("tx begin error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let updated = match sqlx::query(
        "UPDATE cycles SET version = version + 1 WHERE id = $1 AND version = $2",
    )
    .bind(cycle_id)
    .bind(payload.version)
    .execute(&mut *tx)
    .await
    {
        Ok(r) => r.rows_affected(),
        Err(e) => {
            eprintln!("version check error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if updated == 0 {
        return HttpResponse::Conflict()
            .json(json!({"message": "La tanda fue modificada por otra operación."}));
    }

    for slot in &slots {
        if let Err(e) =
            sqlx::query("UPDATE participants SET turn_order = $1 WHERE id = $2 AND cycle_id = $3")
                .bind(slot.turn_order)
                .bind(slot.participant_id)
                .bind(cycle_id)
                .execute(&mut *tx)
                .await
        {
            eprintln!("participant order update error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    if let Some(start_date) = cycle.start_date {
        let entries = schedule::build_schedule(start_date, cycle.cadence, &slots);
        if let Err(e) = db::write_schedule(&mut tx, cycle_id, &entries).await {
            eprintln!("schedule rewrite error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    if let Err(e) = tx.commit().await {
        eprintln!("tx commit error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok().json(json!({"message": "Orden actualizado correctamente."}))
}

/// Defines the start date, freezes the computed schedule and reminds every
/// participant of their first due date.
#[patch("/cycles/{cycle_id}/start-date")]
pub async fn define_start_date(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<StartDateRequest>,
) -> impl Responder {
    let cycle_id = path.into_inner();

    let cycle = match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"message": "Tanda no encontrada."}))
        }
        Err(e) => {
            eprintln!("get_cycle error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let slots = match db::schedule_slots(&state.pool, cycle_id).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("schedule_slots error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let start_date = payload.start_date;
    let entries = schedule::build_schedule(start_date, cycle.cadence, &slots);

    let mut tx = match state.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            eprintln!("tx begin error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let version_guard = match payload.version {
        Some(version) => sqlx::query(
            r#"UPDATE cycles
               SET start_date = $1, pay_day = $2, version = version + 1
               WHERE id = $3 AND version = $4"#,
        )
        .bind(start_date)
        .bind(schedule::pay_day_name(start_date))
        .bind(cycle_id)
        .bind(version)
        .execute(&mut *tx)
        .await,
        None => sqlx::query(
            r#"UPDATE cycles
               SET start_date = $1, pay_day = $2, version = version + 1
               WHERE id = $3"#,
        )
        .bind(start_date)
        .bind(schedule::pay_day_name(start_date))
        .bind(cycle_id)
        .execute(&mut *tx)
        .await,
    };

    match version_guard {
        Ok(r) if r.rows_affected() == 0 => {
            return HttpResponse::Conflict()
                .json(json!({"message": "La tanda fue modificada por otra operación."}));
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("start date update error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    if let Err(e) = db::write_schedule(&mut tx, cycle_id, &entries).await {
        eprintln!("schedule write error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    if let Err(e) = tx.commit().await {
        eprintln!("tx commit error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    // remind each participant of their earliest due date
    let mut first_due: std::collections::HashMap<i32, NaiveDate> = std::collections::HashMap::new();
    for entry in &entries {
        if let Some(due) = entry.due_date {
            first_due.entry(entry.user_id).or_insert(due);
        }
    }

    let fresh = match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(c)) => c,
        _ => cycle,
    };

    for (participant_user, due) in first_due {
        match db::get_user(&state.pool, participant_user).await {
            Ok(Some(user)) => {
                let notifier = state.notifier.clone();
                let cycle = fresh.clone();
                tokio::spawn(async move {
                    notifier.payment_reminder(&user, &cycle, due).await;
                });
            }
            Ok(None) => log::warn!("participant user {participant_user} missing, no reminder sent"),
            Err(e) => log::error!("reminder user lookup error: {e}"),
        }
    }

    HttpResponse::Ok().json(json!({
        "message": "Fecha de inicio definida y fechas de pago generadas correctamente."
    }))
}

#[patch("/cycles/{cycle_id}/start")]
pub async fn start_cycle(state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    let cycle_id = path.into_inner();

    let cycle = match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({"message": "Tanda no encontrada."}))
        }
        Err(e) => {
            eprintln!("get_cycle error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if cycle.started {
        return HttpResponse::BadRequest()
            .json(json!({"message": "La tanda ya ha sido iniciada."}));
    }

    if let Err(e) = sqlx::query(
        r#"UPDATE cycles
           SET started = true, start_date = COALESCE(start_date, CURRENT_DATE)
           WHERE id = $1"#,
    )
    .bind(cycle_id)
    .execute(&state.pool)
    .await
    {
        eprintln!("start cycle error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    // the start may have just fixed the date, so the schedule must exist now
    match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(fresh)) => {
            if let Err(e) = db::regenerate_schedule(&state.pool, &fresh).await {
                eprintln!("schedule recompute error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        }
        _ => return HttpResponse::InternalServerError().finish(),
    }

    HttpResponse::Ok().json(json!({"message": "Tanda iniciada exitosamente."}))
}

#[patch("/cycles/{cycle_id}/turns")]
pub async fn update_turns(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<TurnsRequest>,
) -> impl Responder {
    let cycle_id = path.into_inner();

    if payload.total_turns <= 0 {
        return HttpResponse::BadRequest()
            .json(json!({"message": "El número de participantes debe ser mayor a 0."}));
    }

    let current = match db::count_participants(&state.pool, cycle_id).await {
        Ok(n) => n,
        Err(e) => {
            eprintln!("count_participants error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if (payload.total_turns as i64) < current {
        return HttpResponse::BadRequest().json(json!({
            "message": "La tanda ya tiene más participantes que el número solicitado."
        }));
    }

    let result = sqlx::query("UPDATE cycles SET total_turns = $1 WHERE id = $2")
        .bind(payload.total_turns)
        .bind(cycle_id)
        .execute(&state.pool)
        .await;

    match result {
        Ok(r) if r.rows_affected() == 0 => {
            HttpResponse::NotFound().json(json!({"message": "Tanda no encontrada."}))
        }
        Ok(_) => HttpResponse::Ok()
            .json(json!({"message": "Número máximo de participantes actualizado."})),
        Err(e) => {
            eprintln!("update turns error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Admin panel: every cycle with its roster.
#[get("/cycles")]
pub async fn list_cycles(state: web::Data<AppState>) -> impl Responder {
    let cycles = match db::list_cycles(&state.pool).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("list_cycles error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let mut out = Vec::with_capacity(cycles.len());
    for cycle in &cycles {
        match cycle_with_participants(&state.pool, cycle).await {
            Ok(body) => out.push(body),
            Err(e) => {
                eprintln!("cycle response error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        }
    }

    HttpResponse::Ok().json(out)
}

/// Cycles the calling user participates in, with their position in the turn
/// order.
#[get("/cycles/mine")]
pub async fn my_cycles(state: web::Data<AppState>, user_id: web::ReqData<i32>) -> impl Responder {
    let user_id = *user_id;

    let cycles = match db::list_cycles_for_user(&state.pool, user_id).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("list_cycles_for_user error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if cycles.is_empty() {
        return HttpResponse::NotFound()
            .json(json!({"message": "No se encontraron tandas para este usuario."}));
    }

    let mut out = Vec::with_capacity(cycles.len());
    for cycle in &cycles {
        let participants = match db::list_participants(&state.pool, cycle.id).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("list_participants error: {e}");
                return HttpResponse::InternalServerError().finish();
            }
        };
        let position = participants
            .iter()
            .position(|p| p.user_id == user_id)
            .map(|idx| idx + 1);
        let remaining = cycle.total_turns as i64 - participants.len() as i64;
        out.push(json!({
            "cycle": cycle,
            "participants": participants,
            "position": position,
            "remaining_slots": remaining,
        }));
    }

    HttpResponse::Ok().json(out)
}

#[get("/cycles/{cycle_id}")]
pub async fn get_cycle(state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    let cycle_id = path.into_inner();

    match db::get_cycle(&state.pool, cycle_id).await {
        Ok(Some(cycle)) => match cycle_with_participants(&state.pool, &cycle).await {
            Ok(body) => HttpResponse::Ok().json(body),
            Err(e) => {
                eprintln!("cycle response error: {e}");
                HttpResponse::InternalServerError().finish()
            }
        },
        Ok(None) => HttpResponse::NotFound().json(json!({"message": "Tanda no encontrada."})),
        Err(e) => {
            eprintln!("get_cycle error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Admin removal; the only path that deletes a cycle.
#[delete("/cycles/{cycle_id}")]
pub async fn delete_cycle(state: web::Data<AppState>, path: web::Path<i32>) -> impl Responder {
    let cycle_id = path.into_inner();

    match sqlx::query("DELETE FROM cycles WHERE id = $1")
        .bind(cycle_id)
        .execute(&state.pool)
        .await
    {
        Ok(_) => HttpResponse::Ok().json(json!({"message": "Tanda eliminada exitosamente."})),
        Err(e) => {
            eprintln!("delete cycle error: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
