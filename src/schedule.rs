// src/schedule.rs
//
// Date-cycle computation for savings circles: the full due/receipt schedule
// for a cycle, and the resolution of a participant's next unpaid due date.

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{Cadence, PaymentStatus};

/// Participant slot as the generator needs it.
#[derive(Debug, Clone)]
pub struct SlotRef {
    pub participant_id: i32,
    pub user_id: i32,
    pub turn_order: i32,
}

/// One generated schedule entry. Exactly one of `due_date` / `receipt_date`
/// is set: the receiver of a turn gets a receipt date, everyone else owes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEntry {
    pub participant_id: i32,
    pub user_id: i32,
    pub turn_index: i32,
    pub due_date: Option<NaiveDate>,
    pub receipt_date: Option<NaiveDate>,
}

/// Builds the complete schedule for a cycle: participants sorted ascending by
/// turn order; for turn t the due date is `start + t * interval`; the
/// participant whose position equals t receives the pot the day after instead
/// of owing. Produces participants × turns entries and always replaces the
/// previous schedule wholesale.
pub fn build_schedule(
    start_date: NaiveDate,
    cadence: Cadence,
    participants: &[SlotRef],
) -> Vec<GeneratedEntry> {
    let mut ordered: Vec<SlotRef> = participants.to_vec();
    ordered.sort_by_key(|p| p.turn_order);

    let interval = cadence.interval_days();
    let total = ordered.len();
    let mut entries = Vec::with_capacity(total * total);

    for turn in 0..total {
        let due = start_date + Duration::days(turn as i64 * interval);
        let receipt = due + Duration::days(1);

        for (idx, slot) in ordered.iter().enumerate() {
            entries.push(GeneratedEntry {
                participant_id: slot.participant_id,
                user_id: slot.user_id,
                turn_index: turn as i32,
                due_date: if idx == turn { None } else { Some(due) },
                receipt_date: if idx == turn { Some(receipt) } else { None },
            });
        }
    }

    entries
}

/// A prior payment attempt, as the resolver sees it.
#[derive(Debug, Clone)]
pub struct PaymentRef {
    pub due_date: NaiveDate,
    pub status: PaymentStatus,
}

/// Picks the due date a new submission should count against.
///
/// A due date is pending while no approved-or-pending payment carries exactly
/// that date; rejected attempts do not consume it. The earliest pending date
/// wins, except that a most-recent rejected attempt forces a retry against
/// its own date before the scan advances.
pub fn next_pending_due_date(
    due_dates: &[NaiveDate],
    history: &[PaymentRef],
) -> Option<NaiveDate> {
    let settled: Vec<NaiveDate> = history
        .iter()
        .filter(|p| p.status.is_settled())
        .map(|p| p.due_date)
        .collect();

    // retry semantics: history is ordered by (due_date, insertion), so the
    // last record is the participant's most recent attempt
    if let Some(last) = history.last() {
        if last.status == PaymentStatus::Rejected && !settled.contains(&last.due_date) {
            return Some(last.due_date);
        }
    }

    let mut pending: Vec<NaiveDate> = due_dates
        .iter()
        .copied()
        .filter(|d| !settled.contains(d))
        .collect();
    pending.sort();
    pending.first().copied()
}

/// Weekday label stored on the cycle once a start date is defined. The
/// operators run the panel in Spanish, so the label matches the original
/// receipts and emails.
pub fn pay_day_name(date: NaiveDate) -> &'static str {
    const DAYS: [&str; 7] = [
        "Domingo",
        "Lunes",
        "Martes",
        "Miércoles",
        "Jueves",
        "Viernes",
        "Sábado",
    ];
    DAYS[date.weekday().num_days_from_sunday() as usize]
}
