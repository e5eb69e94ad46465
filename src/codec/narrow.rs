//! Lossy-safe numeric conversions. None of these fail; out-of-range input is
//! clamped and NaN becomes zero.

use crate::entity::HOTBAR_SLOTS;

pub fn to_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

pub fn to_f32(value: f64) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(f64::from(f32::MIN), f64::from(f32::MAX)) as f32
}

/// Experience progress, `0.0..=1.0`.
pub fn fraction(value: f64) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0) as f32
}

pub fn non_negative(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, f64::MAX)
}

pub fn hotbar_slot(slot: i32) -> i32 {
    slot.clamp(0, HOTBAR_SLOTS - 1)
}
