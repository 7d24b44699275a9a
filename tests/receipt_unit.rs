use chrono::NaiveDate;

use gias_backend::models::{DestinationAccount, PaymentStatus};
use gias_backend::receipt::{manual_review_check, reconcile, LATE_PENALTY_FEE};

fn account() -> DestinationAccount {
    DestinationAccount {
        id: 1,
        titleholder: "Maria Lopez Garcia".to_string(),
        account_number: "012345678901".to_string(),
        card_number: Some("4152313112345678".to_string()),
        bank: "BBVA".to_string(),
    }
}

fn due() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

#[test]
fn amount_found_next_to_keyword() {
    let text = "Transferencia por $500.00 BBVA cuenta 8901 el 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
    assert_eq!(check.detected_amount, Some(500.0));
    assert!(!check.with_penalty);
}

#[test]
fn amount_found_by_fallback_scan() {
    // "monto transferido" keeps the keyword too far from the number, so the
    // loose scan has to pick it up
    let text = "Monto transferido: $500.00 MXN BBVA cuenta 8901 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.detected_amount, Some(500.0));
    assert_eq!(check.status, PaymentStatus::Approved);
}

#[test]
fn no_plausible_number_leaves_amount_undetected() {
    // every numeric token is below the plausible payment range
    let text = "transferencia BBVA cuenta 01";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.detected_amount, None);
    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("N/A"));
}

#[test]
fn fallback_scan_skips_out_of_range_numbers() {
    // "$5.00" is too small to be a payment, the account tail wins instead
    let text = "total $5.00 BBVA cuenta 8901";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.detected_amount, Some(8901.0));
    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("El monto no coincide"));
}

#[test]
fn card_digits_satisfy_account_check() {
    // last 3 of the card instead of last 4 of the account
    let text = "importe: $500.00 BBVA tarjeta terminación 678 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
}

#[test]
fn missing_account_and_card_digits_reject() {
    let text = "importe: $500.00 BBVA 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("últimos dígitos"));
}

#[test]
fn bank_mismatch_rejects() {
    let text = "importe: $500.00 Santander cuenta 8901 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("banco"));
}

#[test]
fn receipt_dated_inside_window_is_on_time() {
    // due 2024-06-10, window opens 2024-06-06
    let text = "importe: $500.00 BBVA cuenta 8901 07/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
    assert!(!check.with_penalty);
    assert_eq!(
        check.detected_date,
        NaiveDate::from_ymd_opt(2024, 6, 7)
    );
}

#[test]
fn too_early_receipt_rejects() {
    let text = "importe: $500.00 BBVA cuenta 8901 01/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("La fecha no es válida"));
}

#[test]
fn late_receipt_with_matching_amount_approves_with_penalty() {
    let text = "importe: $500.00 BBVA cuenta 8901 12/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
    assert!(check.with_penalty);
    assert!(check.message.contains("2 día(s) de retraso"));
}

#[test]
fn late_receipt_with_wrong_amount_rejects() {
    let text = "importe: $450.00 BBVA cuenta 8901 12/06/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(!check.with_penalty);
    assert!(check
        .message
        .contains(&format!("penalización de ${LATE_PENALTY_FEE:.0}")));
}

#[test]
fn spanish_long_form_date_is_recognized() {
    let text = "importe: $500.00 BBVA cuenta 8901, 7 de junio de 2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
    assert_eq!(
        check.detected_date,
        NaiveDate::from_ymd_opt(2024, 6, 7)
    );
}

#[test]
fn unreadable_date_rejects() {
    let text = "importe: $500.00 BBVA cuenta 8901 99/99/2024";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Rejected);
    assert!(check.message.contains("La fecha no es válida"));
}

#[test]
fn missing_date_does_not_block_approval() {
    // the operator rules only validate a date when one is actually extracted
    let text = "importe: $500.00 BBVA cuenta 8901";
    let check = reconcile(text, 500.0, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
    assert_eq!(check.detected_date, None);
}

#[test]
fn titleholder_is_informational_only() {
    let with_name = "importe: $500.00 BBVA cuenta 8901 maria 07/06/2024";
    let without_name = "importe: $500.00 BBVA cuenta 8901 07/06/2024";

    let a = reconcile(with_name, 500.0, &account(), due());
    let b = reconcile(without_name, 500.0, &account(), due());

    assert!(a.titleholder_match);
    assert!(!b.titleholder_match);
    assert_eq!(a.status, PaymentStatus::Approved);
    assert_eq!(b.status, PaymentStatus::Approved);
}

#[test]
fn amount_within_a_cent_matches() {
    let text = "importe: $500.00 BBVA cuenta 8901 07/06/2024";
    let check = reconcile(text, 500.005, &account(), due());

    assert_eq!(check.status, PaymentStatus::Approved);
}

#[test]
fn ocr_failure_degrades_to_manual_review() {
    let check = manual_review_check();

    assert_eq!(check.status, PaymentStatus::Pending);
    assert!(check.message.contains("revisión manual"));
}
