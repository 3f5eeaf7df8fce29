mod common;

use common::Bench;
use trickler_core::{ChargeOutcome, State};
use trickler_traits::Lights;

/// Auger jam leaves 0.5 gr; evaluation grades it as a broken throw.
fn graded_short() -> Bench {
    let mut b = Bench::new(State::Dispense);
    b.w().bulk_script.push_back(0.5);
    assert_eq!(b.machine.step(), State::Evaluate);
    assert_eq!(b.machine.step(), State::Evaluate);
    b
}

#[test]
fn up_tops_up_one_kernel_after_an_underthrow() {
    let mut b = graded_short();
    b.w().up = true;
    assert_eq!(b.machine.step(), State::Evaluate);
    assert_eq!(b.w().trickle_moves(), vec![100]);

    b.w().up = false;
    assert_eq!(b.machine.step(), State::Evaluate);
    let eval = b.machine.last_evaluation().expect("regraded");
    assert!((eval.measured - 0.521).abs() < 0.006, "{}", eval.measured);
    assert_eq!(b.machine.charges(), 1);
}

#[test]
fn top_up_needs_an_underthrow() {
    let mut b = Bench::new(State::Dispense);
    b.w().pan = 32.2;
    b.machine.step();
    b.machine.step();
    b.w().up = true;
    b.machine.step();
    assert!(b.w().trickle_moves().is_empty());
}

#[test]
fn unchanged_pan_is_not_regraded() {
    let mut b = graded_short();
    let screens = b.w().screens.len();
    for _ in 0..3 {
        assert_eq!(b.machine.step(), State::Evaluate);
    }
    assert_eq!(b.w().screens.len(), screens);
}

#[test]
fn lifting_the_pan_returns_to_ready() {
    let mut b = graded_short();
    b.w().pan = -250.0;
    assert_eq!(b.machine.step(), State::Ready);
    assert_eq!(b.last_lights(), Some(Lights::OFF));
}

#[test]
fn disable_returns_to_idle() {
    let mut b = graded_short();
    b.w().enabled = false;
    assert_eq!(b.machine.step(), State::Idle);
    assert_eq!(
        b.machine.last_evaluation().map(|e| e.outcome),
        Some(ChargeOutcome::ExtremeUnderthrow)
    );
}
