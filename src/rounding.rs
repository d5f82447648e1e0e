// src/rounding.rs
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::atomic::{AtomicU32, Ordering};

// Process-wide precision for metric values and exported costs.
static ROUNDING_DECIMALS: AtomicU32 = AtomicU32::new(5);

pub fn set_rounding_decimals(decimals: u32) {
    ROUNDING_DECIMALS.store(decimals, Ordering::Relaxed);
}

pub fn rounding_decimals() -> u32 {
    ROUNDING_DECIMALS.load(Ordering::Relaxed)
}

/// Round half to even at the process-wide precision.
pub fn round(value: f64) -> f64 {
    round_dp(value, rounding_decimals())
}

pub fn round_dp(value: f64, decimals: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d
            .round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven)
            .to_f64()
            .unwrap_or(value),
        None => value,
    }
}
