//! Target weight editing from the up/down buttons.
//!
//! Targets are held in centigrains so digit rollover is exact; the balance
//! resolves 0.02 gr, so the hundredths digit is kept even.

/// Lowest and highest settable target, centigrains.
pub const TARGET_RANGE_CG: (i32, i32) = (0, 25_000);

/// Presses before the step grows to 0.10 gr (once hundredths are 0).
pub const TENTHS_AFTER: u32 = 5;
/// Presses before the step grows to 1.00 gr (once tenths are 0).
pub const UNITS_AFTER: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

pub fn grains_to_cg(grains: f32) -> i32 {
    (grains * 100.0).round() as i32
}

pub fn cg_to_grains(cg: i32) -> f32 {
    cg as f32 / 100.0
}

/// Normalise the tenths/hundredths digits of `cg` the way the editor sees
/// them: an odd hundredth is rounded up to even, and a 9 carries into the
/// tenths (wrapping 9 -> 0 without touching the units).
fn effective_digits(cg: i32) -> (i32, i32) {
    let mut hundredths = cg % 10;
    let mut tenths = (cg / 10) % 10;
    if hundredths == 9 {
        tenths = (tenths + 1) % 10;
        hundredths = 0;
    } else if hundredths % 2 == 1 {
        hundredths += 1;
    }
    (tenths, hundredths)
}

/// Step size for the `presses`-th consecutive press (1-based), in centigrains.
pub fn step_size_cg(cg: i32, presses: u32) -> i32 {
    let (tenths, hundredths) = effective_digits(cg);
    if presses >= UNITS_AFTER && tenths == 0 {
        100
    } else if presses >= TENTHS_AFTER && hundredths == 0 {
        10
    } else {
        2
    }
}

/// Apply one press and clamp into [`TARGET_RANGE_CG`].
pub fn step_target(cg: i32, presses: u32, dir: Direction) -> i32 {
    let step = step_size_cg(cg, presses);
    let next = match dir {
        Direction::Up => cg + step,
        Direction::Down => cg - step,
    };
    next.clamp(TARGET_RANGE_CG.0, TARGET_RANGE_CG.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hold(start: i32, presses: u32, dir: Direction) -> Vec<i32> {
        let mut cg = start;
        (1..=presses)
            .map(|n| {
                cg = step_target(cg, n, dir);
                cg
            })
            .collect()
    }

    #[test]
    fn held_up_accelerates_through_tenths_then_units() {
        let seq = hold(1000, 20, Direction::Up);
        assert_eq!(
            seq,
            vec![
                1002, 1004, 1006, 1008, 1010, 1020, 1030, 1040, 1050, 1060, 1070, 1080, 1090,
                1100, 1200, 1300, 1400, 1500, 1600, 1700
            ]
        );
    }

    #[test]
    fn held_down_is_symmetric_from_a_round_value() {
        let seq = hold(2000, 6, Direction::Down);
        assert_eq!(seq, vec![1998, 1996, 1994, 1992, 1990, 1980]);
    }

    #[rstest]
    #[case(3209, 5, 10)] // 9 carries: tenths 0 -> 1, hundredths 0
    #[case(3293, 15, 2)] // tenths 9, odd hundredths round up but stay nonzero
    #[case(3299, 15, 100)] // 9.9 carries to tenths 0
    #[case(3201, 4, 2)]
    fn step_size_reads_effective_digits(#[case] cg: i32, #[case] presses: u32, #[case] step: i32) {
        assert_eq!(step_size_cg(cg, presses), step);
    }

    #[test]
    fn clamps_to_range() {
        assert_eq!(step_target(0, 1, Direction::Down), 0);
        assert_eq!(step_target(24_990, 20, Direction::Up), 25_000);
    }

    #[test]
    fn grain_conversions_round_trip_two_decimals() {
        assert_eq!(grains_to_cg(32.0), 3200);
        assert_eq!(grains_to_cg(24.34), 2434);
        assert_eq!(cg_to_grains(2434), 24.34);
    }
}
