// src/receipt.rs
//
// Reconciliation of OCR-extracted receipt text against the expected payment:
// amount, destination account/card digits, bank name, titleholder and date
// window. The heuristics define acceptance behavior, so they mirror the
// operator rules exactly; user-facing messages stay in Spanish like the rest
// of the product.

use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{DestinationAccount, PaymentStatus};

/// Flat fee owed when a payment lands after its due date.
pub const LATE_PENALTY_FEE: f64 = 80.0;

/// Days before the due date a receipt may be dated and still count on time.
const EARLY_WINDOW_DAYS: i64 = 4;

#[derive(Debug)]
struct ReceiptPatterns {
    keyword_amount: Regex,
    loose_amount: Regex,
    numeric_date: Regex,
    long_date: Regex,
}

impl ReceiptPatterns {
    fn get() -> &'static Self {
        static INSTANCE: OnceLock<ReceiptPatterns> = OnceLock::new();
        INSTANCE.get_or_init(|| ReceiptPatterns {
            // amount next to a transfer keyword, at most 10 chars away
            keyword_amount: Regex::new(
                r"(monto|importe|total|transferencia|mxn)[^\d]{0,10}\$?\s*(\d{2,5}(?:[.,]\d{2})?)",
            )
            .unwrap(),
            // any currency-shaped number, filtered to a plausible range later
            loose_amount: Regex::new(r"\$?\s*(\d{2,5}(?:[.,]\d{2})?)").unwrap(),
            // 24/03/2025 or 24-03-2025
            numeric_date: Regex::new(r"(\d{2})[/-](\d{2})[/-](\d{4})").unwrap(),
            // "24 de marzo de 2025"
            long_date: Regex::new(r"(\d{1,2})\s+de\s+([a-záéíóú]+)\s+de\s+(\d{4})").unwrap(),
        })
    }
}

/// Outcome of reconciling one receipt.
#[derive(Debug, Clone)]
pub struct ReceiptCheck {
    pub status: PaymentStatus,
    pub with_penalty: bool,
    pub message: String,
    pub detected_amount: Option<f64>,
    pub detected_date: Option<NaiveDate>,
    pub titleholder_match: bool,
}

enum ExtractedDate {
    NotFound,
    Invalid(String),
    Found(NaiveDate),
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn extract_amount(text: &str) -> Option<f64> {
    let patterns = ReceiptPatterns::get();

    if let Some(caps) = patterns.keyword_amount.captures(text) {
        if let Some(value) = caps.get(2).and_then(|m| parse_amount(m.as_str())) {
            return Some(value);
        }
    }

    // fallback: first isolated number in a plausible payment range
    patterns
        .loose_amount
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).and_then(|m| parse_amount(m.as_str())))
        .find(|n| (10.0..=10000.0).contains(n))
}

fn extract_date(text: &str) -> ExtractedDate {
    let patterns = ReceiptPatterns::get();

    if let Some(caps) = patterns.numeric_date.captures(text) {
        let day: u32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let year: i32 = caps[3].parse().unwrap_or(0);
        return match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => ExtractedDate::Found(date),
            None => ExtractedDate::Invalid(caps[0].to_string()),
        };
    }

    if let Some(caps) = patterns.long_date.captures(text) {
        let month = match &caps[2] {
            "enero" => 1,
            "febrero" => 2,
            "marzo" => 3,
            "abril" => 4,
            "mayo" => 5,
            "junio" => 6,
            "julio" => 7,
            "agosto" => 8,
            "septiembre" => 9,
            "octubre" => 10,
            "noviembre" => 11,
            "diciembre" => 12,
            _ => return ExtractedDate::NotFound,
        };
        let day: u32 = caps[1].parse().unwrap_or(0);
        let year: i32 = caps[3].parse().unwrap_or(0);
        return match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => ExtractedDate::Found(date),
            None => ExtractedDate::Invalid(caps[0].to_string()),
        };
    }

    ExtractedDate::NotFound
}

/// Classifies a receipt as approved, pending review or rejected.
///
/// Rules: the detected amount must match the expected amount within 0.01; the
/// text must show the last 4 digits of the destination account or the last 3
/// of the card; the bank name must appear; a detected date must fall in
/// [due - 4 days, due]. A later date is still accepted, flagged with the
/// fixed late penalty, only when the base amount matches exactly. The
/// titleholder check is informational and never blocks approval.
pub fn reconcile(
    raw_text: &str,
    expected_amount: f64,
    account: &DestinationAccount,
    due_date: NaiveDate,
) -> ReceiptCheck {
    let text = raw_text.to_lowercase();

    let mut errors: Vec<String> = Vec::new();
    let mut with_penalty = false;

    let detected_amount = extract_amount(&text);

    // account or card digits
    let account_tail: Option<String> = tail(&account.account_number, 4);
    let card_tail: Option<String> = account.card_number.as_deref().and_then(|c| tail(c, 3));
    let account_ok = account_tail.as_deref().is_some_and(|t| text.contains(t));
    let card_ok = card_tail.as_deref().is_some_and(|t| text.contains(t));
    if !account_ok && !card_ok {
        errors.push(
            "No coincide con los últimos dígitos de la cuenta ni de la tarjeta.".to_string(),
        );
    }

    let bank_ok = text.contains(&account.bank.to_lowercase());
    if !bank_ok {
        errors.push("El banco no coincide.".to_string());
    }

    let titleholder_match = account
        .titleholder
        .to_lowercase()
        .split_whitespace()
        .next()
        .is_some_and(|first| text.contains(first));

    let amount_ok = detected_amount.is_some_and(|a| (a - expected_amount).abs() < 0.01);

    // date window
    let window_start = due_date - Duration::days(EARLY_WINDOW_DAYS);
    let mut date_ok = false;
    let mut date_note = String::new();
    let mut detected_date = None;

    match extract_date(&text) {
        ExtractedDate::Found(receipt_date) => {
            detected_date = Some(receipt_date);

            if receipt_date >= window_start && receipt_date <= due_date {
                date_ok = true;
                date_note = "Pagaste a tiempo.".to_string();
            }

            if receipt_date > due_date {
                let days_late = (receipt_date - due_date).num_days();
                if amount_ok {
                    date_ok = true;
                    with_penalty = true;
                    date_note =
                        format!("Pagaste con penalización por {days_late} día(s) de retraso.");
                } else {
                    errors.push(format!(
                        "Pagaste {days_late} día(s) después, pero no se detecta el monto con penalización de ${LATE_PENALTY_FEE:.0}.",
                    ));
                }
            }

            if !date_ok && date_note.is_empty() {
                errors.push(format!(
                    "La fecha no es válida. Debes pagar entre el {} y el {}, pero el comprobante muestra {}.",
                    window_start.format("%d/%m/%Y"),
                    due_date.format("%d/%m/%Y"),
                    receipt_date.format("%d/%m/%Y"),
                ));
            }
        }
        ExtractedDate::Invalid(raw) => {
            errors.push(format!(
                "La fecha no es válida. Debes pagar entre el {} y el {}, pero el comprobante muestra {}.",
                window_start.format("%d/%m/%Y"),
                due_date.format("%d/%m/%Y"),
                raw,
            ));
        }
        // no date on the receipt does not block approval on its own
        ExtractedDate::NotFound => {}
    }

    if !amount_ok {
        errors.push(format!(
            "El monto no coincide. Deberías pagar ${expected_amount:.2}, pero el comprobante muestra {}.",
            match detected_amount {
                Some(a) => format!("${a:.2}"),
                None => "N/A".to_string(),
            },
        ));
    }

    log::debug!(
        "receipt reconciliation amount_ok={} account_ok={} card_ok={} bank_ok={} date_ok={} titleholder={} penalty={}",
        amount_ok, account_ok, card_ok, bank_ok, date_ok, titleholder_match, with_penalty
    );

    if errors.is_empty() {
        let shown_date = detected_date
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| "detectada".to_string());
        let shown_amount = detected_amount.unwrap_or(expected_amount);
        return ReceiptCheck {
            status: PaymentStatus::Approved,
            with_penalty,
            message: format!(
                "Pago validado correctamente por ${shown_amount:.2} en la fecha {shown_date}. {date_note}",
            ),
            detected_amount,
            detected_date,
            titleholder_match,
        };
    }

    if amount_ok && (account_ok || card_ok) && bank_ok && date_ok {
        return ReceiptCheck {
            status: PaymentStatus::Pending,
            with_penalty,
            message: format!(
                "Pago pendiente de revisión. Observaciones: {}",
                errors.join(" ")
            ),
            detected_amount,
            detected_date,
            titleholder_match,
        };
    }

    ReceiptCheck {
        status: PaymentStatus::Rejected,
        with_penalty,
        message: format!("Pago rechazado. Razones: {}", errors.join(" ")),
        detected_amount,
        detected_date,
        titleholder_match,
    }
}

/// Message stored when the OCR backend itself fails or times out.
pub fn manual_review_check() -> ReceiptCheck {
    ReceiptCheck {
        status: PaymentStatus::Pending,
        with_penalty: false,
        message: "Error al procesar el comprobante. Se requiere revisión manual.".to_string(),
        detected_amount: None,
        detected_date: None,
        titleholder_match: false,
    }
}

fn tail(digits: &str, n: usize) -> Option<String> {
    if digits.is_empty() {
        return None;
    }
    let chars: Vec<char> = digits.chars().collect();
    let start = chars.len().saturating_sub(n);
    Some(chars[start..].iter().collect())
}
