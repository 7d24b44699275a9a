// src/db.rs
//
// Runtime queries only (no compile-time macros) so the build does not depend
// on a dev database being reachable.

use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{
    Cadence, Cycle, DestinationAccount, Notification, Participant, Payment, PaymentMethod,
    PaymentStatus, ScheduleEntry, User,
};
use crate::schedule::{self, GeneratedEntry, PaymentRef, SlotRef};

fn row_to_cycle(r: &PgRow) -> Cycle {
    let cadence: String = r.get("cadence");
    Cycle {
        id: r.get("id"),
        amount: r.get("amount"),
        cadence: Cadence::parse(&cadence).unwrap_or(Cadence::Weekly),
        start_date: r.get("start_date"),
        pay_day: r.get("pay_day"),
        total_turns: r.get("total_turns"),
        started: r.get("started"),
        version: r.get("version"),
        created_at: r.get("created_at"),
    }
}

fn row_to_payment(r: &PgRow) -> Payment {
    let status: String = r.get("status");
    let method: String = r.get("method");
    Payment {
        id: r.get("id"),
        user_id: r.get("user_id"),
        cycle_id: r.get("cycle_id"),
        amount: r.get("amount"),
        due_date: r.get("due_date"),
        status: PaymentStatus::parse(&status).unwrap_or(PaymentStatus::Pending),
        late: r.get("late"),
        penalty: r.get("penalty"),
        receipt_url: r.get("receipt_url"),
        ocr_message: r.get("ocr_message"),
        method: PaymentMethod::parse(&method).unwrap_or(PaymentMethod::Receipt),
        gateway_reference: r.get("gateway_reference"),
        created_at: r.get("created_at"),
    }
}

pub async fn get_user(pool: &PgPool, user_id: i32) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, name, last_names, email, phone, created_at
           FROM users WHERE id = $1"#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| User {
        id: r.get("id"),
        name: r.get("name"),
        last_names: r.get("last_names"),
        email: r.get("email"),
        phone: r.get("phone"),
        created_at: r.get("created_at"),
    }))
}

pub async fn get_cycle(pool: &PgPool, cycle_id: i32) -> Result<Option<Cycle>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, amount, cadence, start_date, pay_day, total_turns, started, version, created_at
           FROM cycles WHERE id = $1"#,
    )
    .bind(cycle_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| row_to_cycle(&r)))
}

/// The open cycle users join for a given amount + cadence combination, if any.
pub async fn find_open_cycle(
    pool: &PgPool,
    amount: f64,
    cadence: Cadence,
) -> Result<Option<Cycle>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, amount, cadence, start_date, pay_day, total_turns, started, version, created_at
           FROM cycles
           WHERE amount = $1 AND cadence = $2 AND started = false
           ORDER BY id
           LIMIT 1"#,
    )
    .bind(amount)
    .bind(cadence.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| row_to_cycle(&r)))
}

pub async fn list_cycles(pool: &PgPool) -> Result<Vec<Cycle>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, amount, cadence, start_date, pay_day, total_turns, started, version, created_at
           FROM cycles ORDER BY id"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_cycle).collect())
}

pub async fn list_cycles_for_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Cycle>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT DISTINCT c.id, c.amount, c.cadence, c.start_date, c.pay_day,
                  c.total_turns, c.started, c.version, c.created_at
           FROM cycles c
           JOIN participants p ON p.cycle_id = c.id
           WHERE p.user_id = $1
           ORDER BY c.id"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_cycle).collect())
}

pub async fn list_participants(
    pool: &PgPool,
    cycle_id: i32,
) -> Result<Vec<Participant>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT p.id, p.cycle_id, p.user_id, p.turn_order, p.has_paid,
                  u.name AS user_name, u.email AS user_email
           FROM participants p
           JOIN users u ON u.id = p.user_id
           WHERE p.cycle_id = $1
           ORDER BY p.turn_order"#,
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Participant {
            id: r.get("id"),
            cycle_id: r.get("cycle_id"),
            user_id: r.get("user_id"),
            turn_order: r.get("turn_order"),
            has_paid: r.get("has_paid"),
            user_name: r.get("user_name"),
            user_email: r.get("user_email"),
        })
        .collect())
}

pub async fn count_participants(pool: &PgPool, cycle_id: i32) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM participants WHERE cycle_id = $1")
        .bind(cycle_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

/// Participant slots as the schedule generator consumes them.
pub async fn schedule_slots(pool: &PgPool, cycle_id: i32) -> Result<Vec<SlotRef>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, user_id, turn_order FROM participants
           WHERE cycle_id = $1 ORDER BY turn_order"#,
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| SlotRef {
            participant_id: r.get("id"),
            user_id: r.get("user_id"),
            turn_order: r.get("turn_order"),
        })
        .collect())
}

/// Replaces a cycle's schedule inside an open transaction. Always a full
/// delete + insert, never an incremental patch.
pub async fn write_schedule(
    tx: &mut Transaction<'_, Postgres>,
    cycle_id: i32,
    entries: &[GeneratedEntry],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM schedule_entries WHERE cycle_id = $1")
        .bind(cycle_id)
        .execute(&mut **tx)
        .await?;

    for entry in entries {
        sqlx::query(
            r#"INSERT INTO schedule_entries
               (cycle_id, participant_id, user_id, turn_index, due_date, receipt_date)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(cycle_id)
        .bind(entry.participant_id)
        .bind(entry.user_id)
        .bind(entry.turn_index)
        .bind(entry.due_date)
        .bind(entry.receipt_date)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Recomputes the full schedule for a cycle and bumps its version. A cycle
/// without a start date stays unscheduled.
pub async fn regenerate_schedule(pool: &PgPool, cycle: &Cycle) -> Result<(), sqlx::Error> {
    let Some(start_date) = cycle.start_date else {
        return Ok(());
    };

    let slots = schedule_slots(pool, cycle.id).await?;
    let entries = schedule::build_schedule(start_date, cycle.cadence, &slots);

    let mut tx = pool.begin().await?;
    write_schedule(&mut tx, cycle.id, &entries).await?;
    sqlx::query("UPDATE cycles SET version = version + 1 WHERE id = $1")
        .bind(cycle.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// A cycle's full schedule, as the panel displays it.
pub async fn list_schedule_entries(
    pool: &PgPool,
    cycle_id: i32,
) -> Result<Vec<ScheduleEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, cycle_id, participant_id, user_id, turn_index, due_date, receipt_date
           FROM schedule_entries
           WHERE cycle_id = $1
           ORDER BY turn_index, id"#,
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ScheduleEntry {
            id: r.get("id"),
            cycle_id: r.get("cycle_id"),
            participant_id: r.get("participant_id"),
            user_id: r.get("user_id"),
            turn_index: r.get("turn_index"),
            due_date: r.get("due_date"),
            receipt_date: r.get("receipt_date"),
        })
        .collect())
}

/// The participant's payable dates in a cycle; receipt dates are
/// receiver-side bookkeeping and never payable.
pub async fn participant_due_dates(
    pool: &PgPool,
    cycle_id: i32,
    user_id: i32,
) -> Result<Vec<NaiveDate>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT due_date FROM schedule_entries
           WHERE cycle_id = $1 AND user_id = $2 AND due_date IS NOT NULL
           ORDER BY due_date"#,
    )
    .bind(cycle_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.get("due_date")).collect())
}

/// Payment history ordered by (due_date, id) so the last element is the most
/// recent attempt, the ordering the pending-date resolver relies on.
pub async fn payment_history(
    pool: &PgPool,
    user_id: i32,
    cycle_id: i32,
) -> Result<Vec<PaymentRef>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT due_date, status FROM payments
           WHERE user_id = $1 AND cycle_id = $2
           ORDER BY due_date, id"#,
    )
    .bind(user_id)
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let status: String = r.get("status");
            PaymentRef {
                due_date: r.get("due_date"),
                status: PaymentStatus::parse(&status).unwrap_or(PaymentStatus::Pending),
            }
        })
        .collect())
}

pub struct NewPayment<'a> {
    pub user_id: i32,
    pub cycle_id: i32,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
    pub late: bool,
    pub penalty: f64,
    pub receipt_url: Option<&'a str>,
    pub ocr_message: Option<&'a str>,
    pub method: PaymentMethod,
    pub gateway_reference: Option<&'a str>,
}

pub async fn insert_payment(pool: &PgPool, new: &NewPayment<'_>) -> Result<Payment, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO payments
           (user_id, cycle_id, amount, due_date, status, late, penalty,
            receipt_url, ocr_message, method, gateway_reference)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
           RETURNING id, user_id, cycle_id, amount, due_date, status, late, penalty,
                     receipt_url, ocr_message, method, gateway_reference, created_at"#,
    )
    .bind(new.user_id)
    .bind(new.cycle_id)
    .bind(new.amount)
    .bind(new.due_date)
    .bind(new.status.as_str())
    .bind(new.late)
    .bind(new.penalty)
    .bind(new.receipt_url)
    .bind(new.ocr_message)
    .bind(new.method.as_str())
    .bind(new.gateway_reference)
    .fetch_one(pool)
    .await?;

    Ok(row_to_payment(&row))
}

pub async fn set_payment_status(
    pool: &PgPool,
    payment_id: i32,
    status: PaymentStatus,
) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE payments SET status = $1 WHERE id = $2
           RETURNING id, user_id, cycle_id, amount, due_date, status, late, penalty,
                     receipt_url, ocr_message, method, gateway_reference, created_at"#,
    )
    .bind(status.as_str())
    .bind(payment_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| row_to_payment(&r)))
}

pub async fn list_payments_for_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Payment>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, user_id, cycle_id, amount, due_date, status, late, penalty,
                  receipt_url, ocr_message, method, gateway_reference, created_at
           FROM payments WHERE user_id = $1
           ORDER BY created_at DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_payment).collect())
}

pub async fn gateway_payment_exists(
    pool: &PgPool,
    user_id: i32,
    cycle_id: i32,
    due_date: NaiveDate,
    reference: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT 1 AS hit FROM payments
           WHERE method = 'gateway'
             AND (gateway_reference = $4
                  OR (user_id = $1 AND cycle_id = $2 AND due_date = $3))
           LIMIT 1"#,
    )
    .bind(user_id)
    .bind(cycle_id)
    .bind(due_date)
    .bind(reference)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

pub async fn mark_participant_paid(
    pool: &PgPool,
    cycle_id: i32,
    user_id: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE participants SET has_paid = true WHERE cycle_id = $1 AND user_id = $2")
        .bind(cycle_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn destination_account(
    pool: &PgPool,
) -> Result<Option<DestinationAccount>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT id, titleholder, account_number, card_number, bank
           FROM destination_accounts ORDER BY id LIMIT 1"#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DestinationAccount {
        id: r.get("id"),
        titleholder: r.get("titleholder"),
        account_number: r.get("account_number"),
        card_number: r.get("card_number"),
        bank: r.get("bank"),
    }))
}

/// There is exactly one destination account; writing replaces it in place.
pub async fn upsert_destination_account(
    pool: &PgPool,
    account: &DestinationAccount,
) -> Result<DestinationAccount, sqlx::Error> {
    let existing = destination_account(pool).await?;

    let row = match existing {
        Some(current) => {
            sqlx::query(
                r#"UPDATE destination_accounts
                   SET titleholder = $1, account_number = $2, card_number = $3, bank = $4
                   WHERE id = $5
                   RETURNING id, titleholder, account_number, card_number, bank"#,
            )
            .bind(&account.titleholder)
            .bind(&account.account_number)
            .bind(&account.card_number)
            .bind(&account.bank)
            .bind(current.id)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"INSERT INTO destination_accounts (titleholder, account_number, card_number, bank)
                   VALUES ($1, $2, $3, $4)
                   RETURNING id, titleholder, account_number, card_number, bank"#,
            )
            .bind(&account.titleholder)
            .bind(&account.account_number)
            .bind(&account.card_number)
            .bind(&account.bank)
            .fetch_one(pool)
            .await?
        }
    };

    Ok(DestinationAccount {
        id: row.get("id"),
        titleholder: row.get("titleholder"),
        account_number: row.get("account_number"),
        card_number: row.get("card_number"),
        bank: row.get("bank"),
    })
}

pub async fn insert_notification(
    pool: &PgPool,
    user_id: i32,
    kind: &str,
    title: &str,
    message: &str,
    channel: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO notifications (user_id, kind, title, message, channel)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(title)
    .bind(message)
    .bind(channel)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_notifications_for_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Vec<Notification>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, user_id, kind, title, message, channel, created_at
           FROM notifications WHERE user_id = $1
           ORDER BY created_at DESC
           LIMIT 50"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Notification {
            id: r.get("id"),
            user_id: r.get("user_id"),
            kind: r.get("kind"),
            title: r.get("title"),
            message: r.get("message"),
            channel: r.get("channel"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Every due-date entry across every cycle; dashboard aggregation walks this
/// whole set, which is fine at the volumes this system targets.
pub async fn all_due_entries(
    pool: &PgPool,
) -> Result<Vec<(i32, i32, NaiveDate)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT cycle_id, user_id, due_date FROM schedule_entries
           WHERE due_date IS NOT NULL"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("cycle_id"), r.get("user_id"), r.get("due_date")))
        .collect())
}

pub async fn all_payment_keys(
    pool: &PgPool,
) -> Result<Vec<(i32, i32, NaiveDate, PaymentStatus)>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT cycle_id, user_id, due_date, status FROM payments"#)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let status: String = r.get("status");
            (
                r.get("cycle_id"),
                r.get("user_id"),
                r.get("due_date"),
                PaymentStatus::parse(&status).unwrap_or(PaymentStatus::Pending),
            )
        })
        .collect())
}

pub async fn insert_auth_code(
    pool: &PgPool,
    code: &str,
    user_id: i32,
    ttl_seconds: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO auth_codes (code, user_id, expires_at)
           VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision))"#,
    )
    .bind(code)
    .bind(user_id)
    .bind(ttl_seconds as f64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Single-use consume: the row is deleted in the same statement that reads
/// it, so two concurrent token requests cannot both succeed.
pub async fn consume_auth_code(pool: &PgPool, code: &str) -> Result<Option<i32>, sqlx::Error> {
    let row = sqlx::query(
        r#"DELETE FROM auth_codes
           WHERE code = $1 AND expires_at > NOW()
           RETURNING user_id"#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;

    // expired rows are swept lazily
    sqlx::query("DELETE FROM auth_codes WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;

    Ok(row.map(|r| r.get("user_id")))
}

pub async fn insert_access_token(
    pool: &PgPool,
    token: &str,
    user_id: i32,
    ttl_seconds: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO access_tokens (token, user_id, expires_at)
           VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision))"#,
    )
    .bind(token)
    .bind(user_id)
    .bind(ttl_seconds as f64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_voice_pin(pool: &PgPool, user_id: i32, pin: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET voice_pin = $1, voice_pin_active = true WHERE id = $2",
    )
    .bind(pin)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_user_by_voice_pin(
    pool: &PgPool,
    pin: &str,
) -> Result<Option<(i32, String)>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, name FROM users WHERE voice_pin = $1 AND voice_pin_active = true",
    )
    .bind(pin)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| (r.get("id"), r.get("name"))))
}
