use chrono::NaiveDate;

use gias_backend::models::{Cadence, PaymentStatus};
use gias_backend::schedule::{
    build_schedule, next_pending_due_date, pay_day_name, PaymentRef, SlotRef,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn slot(participant_id: i32, user_id: i32, turn_order: i32) -> SlotRef {
    SlotRef {
        participant_id,
        user_id,
        turn_order,
    }
}

#[test]
fn weekly_three_participant_schedule() {
    let start = date(2024, 1, 7);
    let slots = vec![slot(1, 11, 1), slot(2, 12, 2), slot(3, 13, 3)];

    let entries = build_schedule(start, Cadence::Weekly, &slots);
    assert_eq!(entries.len(), 9);

    // turn 0: A receives on the 8th, B and C owe on the 7th
    let turn0: Vec<_> = entries.iter().filter(|e| e.turn_index == 0).collect();
    let a0 = turn0.iter().find(|e| e.user_id == 11).unwrap();
    assert_eq!(a0.due_date, None);
    assert_eq!(a0.receipt_date, Some(date(2024, 1, 8)));
    for other in turn0.iter().filter(|e| e.user_id != 11) {
        assert_eq!(other.due_date, Some(date(2024, 1, 7)));
        assert_eq!(other.receipt_date, None);
    }

    // turn 1: B receives on the 15th, A and C owe on the 14th
    let turn1: Vec<_> = entries.iter().filter(|e| e.turn_index == 1).collect();
    let b1 = turn1.iter().find(|e| e.user_id == 12).unwrap();
    assert_eq!(b1.receipt_date, Some(date(2024, 1, 15)));
    for other in turn1.iter().filter(|e| e.user_id != 12) {
        assert_eq!(other.due_date, Some(date(2024, 1, 14)));
    }

    // turn 2: C receives on the 22nd, A and B owe on the 21st
    let turn2: Vec<_> = entries.iter().filter(|e| e.turn_index == 2).collect();
    let c2 = turn2.iter().find(|e| e.user_id == 13).unwrap();
    assert_eq!(c2.receipt_date, Some(date(2024, 1, 22)));
    for other in turn2.iter().filter(|e| e.user_id != 13) {
        assert_eq!(other.due_date, Some(date(2024, 1, 21)));
    }
}

#[test]
fn every_turn_has_one_receiver_and_equal_due_dates() {
    let start = date(2024, 3, 1);
    let slots = vec![
        slot(1, 21, 1),
        slot(2, 22, 2),
        slot(3, 23, 3),
        slot(4, 24, 4),
    ];

    let entries = build_schedule(start, Cadence::Biweekly, &slots);
    assert_eq!(entries.len(), 16);

    for turn in 0..4 {
        let of_turn: Vec<_> = entries.iter().filter(|e| e.turn_index == turn).collect();
        assert_eq!(of_turn.len(), 4);

        let receivers: Vec<_> = of_turn
            .iter()
            .filter(|e| e.receipt_date.is_some())
            .collect();
        assert_eq!(receivers.len(), 1);

        let dues: Vec<_> = of_turn.iter().filter_map(|e| e.due_date).collect();
        assert_eq!(dues.len(), 3);
        assert!(dues.windows(2).all(|w| w[0] == w[1]));

        // the receipt date is one day after the turn's due date
        assert_eq!(
            receivers[0].receipt_date.unwrap(),
            dues[0] + chrono::Duration::days(1)
        );
    }
}

#[test]
fn monthly_cadence_spaces_turns_thirty_days() {
    let start = date(2024, 5, 15);
    let slots = vec![slot(1, 31, 1), slot(2, 32, 2)];

    let entries = build_schedule(start, Cadence::Monthly, &slots);
    let turn1_due = entries
        .iter()
        .find(|e| e.turn_index == 1 && e.due_date.is_some())
        .and_then(|e| e.due_date)
        .unwrap();
    assert_eq!(turn1_due, date(2024, 6, 14));
}

#[test]
fn generator_is_deterministic() {
    let start = date(2024, 2, 4);
    let slots = vec![slot(5, 50, 2), slot(6, 60, 1), slot(7, 70, 3)];

    let first = build_schedule(start, Cadence::Weekly, &slots);
    let second = build_schedule(start, Cadence::Weekly, &slots);
    assert_eq!(first, second);
}

#[test]
fn participants_are_sorted_by_turn_order() {
    let start = date(2024, 2, 4);
    // given out of order on purpose
    let slots = vec![slot(6, 60, 2), slot(5, 50, 1)];

    let entries = build_schedule(start, Cadence::Weekly, &slots);
    // user 50 holds turn order 1, so they receive in turn 0
    let receiver0 = entries
        .iter()
        .find(|e| e.turn_index == 0 && e.receipt_date.is_some())
        .unwrap();
    assert_eq!(receiver0.user_id, 50);
}

#[test]
fn resolver_picks_earliest_unpaid_date() {
    let dues = vec![date(2024, 1, 7), date(2024, 1, 14), date(2024, 1, 21)];

    assert_eq!(next_pending_due_date(&dues, &[]), Some(date(2024, 1, 7)));

    let history = vec![PaymentRef {
        due_date: date(2024, 1, 7),
        status: PaymentStatus::Approved,
    }];
    assert_eq!(
        next_pending_due_date(&dues, &history),
        Some(date(2024, 1, 14))
    );
}

#[test]
fn resolver_treats_pending_as_settled() {
    let dues = vec![date(2024, 1, 7), date(2024, 1, 14)];
    let history = vec![PaymentRef {
        due_date: date(2024, 1, 7),
        status: PaymentStatus::Pending,
    }];

    assert_eq!(
        next_pending_due_date(&dues, &history),
        Some(date(2024, 1, 14))
    );
}

#[test]
fn resolver_retries_most_recent_rejected_date() {
    let dues = vec![date(2024, 1, 7), date(2024, 1, 14), date(2024, 1, 21)];

    // a rejected attempt on the second date forces a retry there, even though
    // the first date is also unpaid
    let history = vec![PaymentRef {
        due_date: date(2024, 1, 14),
        status: PaymentStatus::Rejected,
    }];
    assert_eq!(
        next_pending_due_date(&dues, &history),
        Some(date(2024, 1, 14))
    );
}

#[test]
fn resolver_moves_on_after_successful_retry() {
    let dues = vec![date(2024, 1, 7), date(2024, 1, 14)];
    // rejected first, then the retry for the same date was approved
    let history = vec![
        PaymentRef {
            due_date: date(2024, 1, 7),
            status: PaymentStatus::Rejected,
        },
        PaymentRef {
            due_date: date(2024, 1, 7),
            status: PaymentStatus::Approved,
        },
    ];

    assert_eq!(
        next_pending_due_date(&dues, &history),
        Some(date(2024, 1, 14))
    );
}

#[test]
fn resolver_returns_none_when_everything_is_settled() {
    let dues = vec![date(2024, 1, 7), date(2024, 1, 14)];
    let history = vec![
        PaymentRef {
            due_date: date(2024, 1, 7),
            status: PaymentStatus::Approved,
        },
        PaymentRef {
            due_date: date(2024, 1, 14),
            status: PaymentStatus::Pending,
        },
    ];

    assert_eq!(next_pending_due_date(&dues, &history), None);
}

#[test]
fn resolver_never_returns_a_settled_date() {
    let dues = vec![
        date(2024, 1, 7),
        date(2024, 1, 14),
        date(2024, 1, 21),
        date(2024, 1, 28),
    ];
    let history = vec![
        PaymentRef {
            due_date: date(2024, 1, 7),
            status: PaymentStatus::Approved,
        },
        PaymentRef {
            due_date: date(2024, 1, 14),
            status: PaymentStatus::Rejected,
        },
        PaymentRef {
            due_date: date(2024, 1, 21),
            status: PaymentStatus::Pending,
        },
    ];

    let settled: Vec<NaiveDate> = history
        .iter()
        .filter(|p| p.status.is_settled())
        .map(|p| p.due_date)
        .collect();

    let resolved = next_pending_due_date(&dues, &history).unwrap();
    assert!(!settled.contains(&resolved));
}

#[test]
fn pay_day_follows_start_date() {
    assert_eq!(pay_day_name(date(2024, 1, 7)), "Domingo");
    assert_eq!(pay_day_name(date(2024, 1, 8)), "Lunes");
    assert_eq!(pay_day_name(date(2024, 1, 13)), "Sábado");
}
