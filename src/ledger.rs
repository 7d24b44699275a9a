// src/ledger.rs
//
// The payment ledger: records each submission exactly once against the due
// date the resolver picks, enforces the anti-duplicate invariant through the
// partial unique index, and feeds the notification dispatcher.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sqlx::PgPool;

use crate::db::{self, NewPayment};
use crate::error::{is_unique_violation, LedgerError};
use crate::models::{Cadence, Cycle, Payment, PaymentMethod, PaymentStatus};
use crate::notify::Notifier;
use crate::ocr::OcrClient;
use crate::receipt::{self, LATE_PENALTY_FEE};
use crate::schedule;

pub struct SubmittedPayment {
    pub payment: Payment,
    pub message: String,
}

pub enum GatewayOutcome {
    Recorded(Payment),
    /// Gateway callbacks are at-least-once; a replay is acknowledged without
    /// writing anything.
    AlreadyProcessed,
}

/// Registers a manual receipt submission.
///
/// Resolves the target due date first and refuses the submission when the
/// participant has nothing left to pay. OCR problems never fail the request:
/// the payment is stored as pending with a review-required explanation.
pub async fn submit_receipt_payment(
    pool: &PgPool,
    ocr: &OcrClient,
    notifier: &Notifier,
    user_id: i32,
    cycle_id: i32,
    amount: f64,
    receipt_url: Option<String>,
) -> Result<SubmittedPayment, LedgerError> {
    let Some(account) = db::destination_account(pool).await? else {
        return Err(LedgerError::validation("No hay cuenta destino registrada."));
    };

    let Some(cycle) = db::get_cycle(pool, cycle_id).await? else {
        return Err(LedgerError::NotFound("cycle"));
    };

    let due_dates = db::participant_due_dates(pool, cycle_id, user_id).await?;
    let history = db::payment_history(pool, user_id, cycle_id).await?;
    let Some(due_date) = schedule::next_pending_due_date(&due_dates, &history) else {
        return Err(LedgerError::NoPendingDueDate);
    };

    let today = Utc::now().date_naive();
    let late = due_date < today;
    let penalty = if late { LATE_PENALTY_FEE } else { 0.0 };

    let check = match &receipt_url {
        Some(url) => match ocr.extract_text(url, "spa").await {
            Ok(text) => receipt::reconcile(&text, amount, &account, due_date),
            Err(e) => {
                log::warn!("ocr failed for payment by user {user_id}: {e}");
                receipt::manual_review_check()
            }
        },
        // nothing to reconcile, leave it for a human
        None => receipt::manual_review_check(),
    };

    let payment = db::insert_payment(
        pool,
        &NewPayment {
            user_id,
            cycle_id,
            amount,
            due_date,
            status: check.status,
            late,
            penalty,
            receipt_url: receipt_url.as_deref(),
            ocr_message: Some(&check.message),
            method: PaymentMethod::Receipt,
            gateway_reference: None,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::DuplicatePayment
        } else {
            LedgerError::Database(e)
        }
    })?;

    if payment.status == PaymentStatus::Approved {
        db::mark_participant_paid(pool, cycle_id, user_id).await?;
    }

    dispatch_payment_notifications(pool, notifier, &payment, &cycle, check.with_penalty).await;

    Ok(SubmittedPayment {
        payment,
        message: check.message,
    })
}

/// Records a gateway-confirmed payment, idempotently.
pub async fn record_gateway_payment(
    pool: &PgPool,
    notifier: &Notifier,
    user_id: i32,
    cycle_id: i32,
    amount: f64,
    reference: &str,
) -> Result<GatewayOutcome, LedgerError> {
    let Some(cycle) = db::get_cycle(pool, cycle_id).await? else {
        return Err(LedgerError::NotFound("cycle"));
    };

    let due_dates = db::participant_due_dates(pool, cycle_id, user_id).await?;
    let history = db::payment_history(pool, user_id, cycle_id).await?;
    let Some(due_date) = schedule::next_pending_due_date(&due_dates, &history) else {
        // every date consumed: a replayed confirmation, or nothing owed
        return Ok(GatewayOutcome::AlreadyProcessed);
    };

    if db::gateway_payment_exists(pool, user_id, cycle_id, due_date, reference).await? {
        return Ok(GatewayOutcome::AlreadyProcessed);
    }

    let today = Utc::now().date_naive();
    let late = due_date < today;
    let penalty = if late { LATE_PENALTY_FEE } else { 0.0 };

    let inserted = db::insert_payment(
        pool,
        &NewPayment {
            user_id,
            cycle_id,
            amount,
            due_date,
            status: PaymentStatus::Approved,
            late,
            penalty,
            receipt_url: None,
            ocr_message: Some("Pago procesado automáticamente desde la pasarela de pagos."),
            method: PaymentMethod::Gateway,
            gateway_reference: Some(reference),
        },
    )
    .await;

    let payment = match inserted {
        Ok(p) => p,
        // a concurrent replay lost the race against the unique index
        Err(e) if is_unique_violation(&e) => return Ok(GatewayOutcome::AlreadyProcessed),
        Err(e) => return Err(LedgerError::Database(e)),
    };

    db::mark_participant_paid(pool, cycle_id, user_id).await?;
    dispatch_payment_notifications(pool, notifier, &payment, &cycle, late).await;

    Ok(GatewayOutcome::Recorded(payment))
}

/// Admin override of a payment's status. Does not re-run OCR.
pub async fn set_status(
    pool: &PgPool,
    notifier: &Notifier,
    payment_id: i32,
    status: PaymentStatus,
) -> Result<Payment, LedgerError> {
    let payment = db::set_payment_status(pool, payment_id, status)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicatePayment
            } else {
                LedgerError::Database(e)
            }
        })?
        .ok_or(LedgerError::NotFound("payment"))?;

    if payment.status == PaymentStatus::Approved {
        db::mark_participant_paid(pool, payment.cycle_id, payment.user_id).await?;
    }

    if let Some(cycle) = db::get_cycle(pool, payment.cycle_id).await? {
        dispatch_payment_notifications(pool, notifier, &payment, &cycle, false).await;
    }

    Ok(payment)
}

#[derive(Debug, serde::Serialize)]
pub struct DashboardTotals {
    pub pending: i64,
    pub approved: i64,
    pub in_review: i64,
}

/// Walks every schedule due-date entry across all cycles and classifies it by
/// ledger presence. O(cycles × participants × turns); this system is
/// explicitly not built for scale.
pub async fn dashboard_totals(pool: &PgPool) -> Result<DashboardTotals, LedgerError> {
    let entries = db::all_due_entries(pool).await?;
    let payments = db::all_payment_keys(pool).await?;

    let mut by_key: HashMap<(i32, i32, NaiveDate), Vec<PaymentStatus>> = HashMap::new();
    for (cycle_id, user_id, due_date, status) in payments {
        by_key
            .entry((cycle_id, user_id, due_date))
            .or_default()
            .push(status);
    }

    let mut totals = DashboardTotals {
        pending: 0,
        approved: 0,
        in_review: 0,
    };

    for (cycle_id, user_id, due_date) in entries {
        let statuses = by_key.get(&(cycle_id, user_id, due_date));
        let approved = statuses
            .is_some_and(|s| s.iter().any(|st| *st == PaymentStatus::Approved));
        let in_review = statuses
            .is_some_and(|s| s.iter().any(|st| *st == PaymentStatus::Pending));

        if approved {
            totals.approved += 1;
        } else if in_review {
            totals.in_review += 1;
        } else {
            totals.pending += 1;
        }
    }

    Ok(totals)
}

#[derive(Debug, serde::Serialize)]
pub struct NextDue {
    pub cycle_id: i32,
    pub due_date: NaiveDate,
    pub amount: f64,
    pub cadence: Cadence,
}

/// The earliest pending due date across every cycle the user belongs to.
pub async fn next_due_for_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<NextDue>, LedgerError> {
    let cycles = db::list_cycles_for_user(pool, user_id).await?;

    let mut best: Option<NextDue> = None;
    for cycle in cycles {
        let due_dates = db::participant_due_dates(pool, cycle.id, user_id).await?;
        let history = db::payment_history(pool, user_id, cycle.id).await?;

        if let Some(due_date) = schedule::next_pending_due_date(&due_dates, &history) {
            let candidate = NextDue {
                cycle_id: cycle.id,
                due_date,
                amount: cycle.amount,
                cadence: cycle.cadence,
            };
            if best.as_ref().is_none_or(|b| candidate.due_date < b.due_date) {
                best = Some(candidate);
            }
        }
    }

    Ok(best)
}

/// Notification fan-out after a ledger write. Runs detached: a broken email
/// or WhatsApp provider must never fail the payment.
async fn dispatch_payment_notifications(
    pool: &PgPool,
    notifier: &Notifier,
    payment: &Payment,
    cycle: &Cycle,
    with_penalty: bool,
) {
    let user = match db::get_user(pool, payment.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            log::warn!("payment {} references missing user {}", payment.id, payment.user_id);
            return;
        }
        Err(e) => {
            log::error!("user lookup failed for notification dispatch: {e}");
            return;
        }
    };

    let notifier = notifier.clone();
    let payment = payment.clone();
    let cycle = cycle.clone();
    tokio::spawn(async move {
        notifier.payment_status_changed(&user, &payment, &cycle).await;
        if with_penalty {
            notifier.late_payment(&user, &payment, &cycle).await;
        }
    });
}
