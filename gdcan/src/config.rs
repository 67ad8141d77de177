//! Bit timing calculation.
//!
//! The solver turns a requested bit rate and the peripheral clock into
//! prescaler and segment values. It first looks for a quanta-per-bit count
//! that divides the clock evenly, preferring counts close to 16, then places
//! the sample point as close to 87.5 % as the integer segment lengths allow.

use fugit::HertzU32;
use gdcan_core::BitTiming;

/// Highest bit rate the controller supports.
pub const MAX_BIT_RATE_HZ: u32 = 1_000_000;

/// Preferred time quanta per bit.
const QUANTA_BASE: u32 = 16;
/// Smallest quanta count tried.
const QUANTA_MIN: u32 = 8;
/// Counts above the base are only tried up to this offset.
const QUANTA_UP_MAX: u32 = 2;
/// The clock may be undershot by up to this much to find an even divider.
const CLOCK_SLACK_HZ: u32 = 1_000;
/// Desired sample point position.
const SAMPLE_POINT_PERMILLE: u32 = 875;
/// Widest prescaler the register can hold.
const PRESCALER_MAX: u32 = 1_024;

/// Errors reported by [`solve`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitTimingError {
    /// Requested bit rate is zero
    ZeroBitRate,
    /// Requested bit rate exceeds [`MAX_BIT_RATE_HZ`]
    BitRateTooHigh {
        /// The rejected bit rate
        bit_rate: HertzU32,
    },
    /// No quanta count divides the clock evenly, even with slack applied
    NoValidQuanta {
        /// The requested bit rate
        bit_rate: HertzU32,
        /// The peripheral clock the search ran against
        can_clock: HertzU32,
    },
    /// The required prescaler does not fit the register field
    PrescalerOutOfRange {
        /// The computed prescaler
        prescaler: u32,
    },
}

/// A successful timing calculation.
///
/// `bit_rate` is the rate the hardware will actually run at; it can differ
/// slightly from the request when the solver settled on a decremented clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SolvedTiming {
    /// Register-ready timing parameters
    pub timing: BitTiming,
    /// Effective bit rate with these parameters
    pub bit_rate: HertzU32,
    /// Achieved sample point position in tenths of a percent
    pub sample_point_permille: u16,
}

/// Computes bit timing for `bit_rate` from the clock feeding the CAN block.
pub fn solve(bit_rate: HertzU32, can_clock: HertzU32) -> Result<SolvedTiming, BitTimingError> {
    let target = bit_rate.to_Hz();
    let clock = can_clock.to_Hz();
    if target == 0 {
        return Err(BitTimingError::ZeroBitRate);
    }
    if target > MAX_BIT_RATE_HZ {
        return Err(BitTimingError::BitRateTooHigh { bit_rate });
    }

    let mut found = None;
    'search: for slack in 0..=CLOCK_SLACK_HZ {
        let Some(clock_try) = clock.checked_sub(slack) else {
            break;
        };
        for offset in 0..=(QUANTA_BASE - QUANTA_MIN) {
            let down = QUANTA_BASE - offset;
            if clock_try % (target * down) == 0 {
                found = Some((clock_try, down));
                break 'search;
            }
            if (1..=QUANTA_UP_MAX).contains(&offset) {
                let up = QUANTA_BASE + offset;
                if clock_try % (target * up) == 0 {
                    found = Some((clock_try, up));
                    break 'search;
                }
            }
        }
    }
    let (clock_used, quanta) = found.ok_or(BitTimingError::NoValidQuanta {
        bit_rate,
        can_clock,
    })?;

    let prescaler = clock_used / (target * quanta);
    if prescaler == 0 || prescaler > PRESCALER_MAX {
        return Err(BitTimingError::PrescalerOutOfRange { prescaler });
    }

    // Sample position in quanta, scaled by 1000. Of the two integer
    // positions around the ideal one, take whichever is closer to 87.5 %;
    // on a tie the later position wins.
    let scaled = SAMPLE_POINT_PERMILLE * quanta;
    let low = scaled / 1_000;
    let sample_quanta = if (low + 1) * 1_000 - scaled <= scaled - low * 1_000 {
        low + 1
    } else {
        low
    };
    let seg1 = sample_quanta - 1;
    let seg2 = quanta - sample_quanta;
    debug_assert!((1..=16).contains(&seg1) && (1..=8).contains(&seg2));

    Ok(SolvedTiming {
        timing: BitTiming {
            prescaler: prescaler as u16,
            seg1: seg1 as u8,
            seg2: seg2 as u8,
            sjw: 1,
        },
        bit_rate: HertzU32::from_raw(clock / (prescaler * quanta)),
        sample_point_permille: (sample_quanta * 1_000 / quanta) as u16,
    })
}

/// Common classic CAN bit rates.
pub mod bit_rate {
    use fugit::HertzU32;

    /// 1 Mbit/s, the hardware maximum
    pub const M1: HertzU32 = HertzU32::from_raw(1_000_000);
    /// 500 kbit/s
    pub const K500: HertzU32 = HertzU32::from_raw(500_000);
    /// 250 kbit/s
    pub const K250: HertzU32 = HertzU32::from_raw(250_000);
    /// 125 kbit/s
    pub const K125: HertzU32 = HertzU32::from_raw(125_000);
    /// 100 kbit/s
    pub const K100: HertzU32 = HertzU32::from_raw(100_000);
    /// 50 kbit/s
    pub const K50: HertzU32 = HertzU32::from_raw(50_000);
    /// 20 kbit/s
    pub const K20: HertzU32 = HertzU32::from_raw(20_000);
    /// 10 kbit/s
    pub const K10: HertzU32 = HertzU32::from_raw(10_000);
}
