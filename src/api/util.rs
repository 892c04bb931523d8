use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use log::debug;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};

use super::Wei;

pub const ETHER_DECIMALS: u32 = 18;

pub fn map_any_err_and_code(e: anyhow::Error) -> (StatusCode, String) {
    debug!("Error: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}
pub fn map_any_err(e: anyhow::Error) -> String {
    debug!("Error: {:#}", e);
    format!("{:#}", e)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Renders a wei amount as ether with `decimals` fractional digits.
pub fn format_ether(value: Wei, decimals: u32) -> String {
    let ether = i128::try_from(value)
        .ok()
        .and_then(|value| Decimal::try_from_i128_with_scale(value, ETHER_DECIMALS).ok());
    match ether {
        Some(ether) => format!("{:.*}", decimals as usize, ether.round_dp(decimals)),
        // Beyond what Decimal can hold, fall back to integer ether.
        None => format!("{}", value / 10u128.pow(ETHER_DECIMALS)),
    }
}

/// Parses a decimal ether amount ("0.1") into wei, rejecting sub-wei
/// precision and negative amounts.
pub fn parse_ether(value: &str) -> Result<Wei> {
    let ether = Decimal::from_str(value.trim())?;
    if ether.is_sign_negative() {
        bail!("ether amount must not be negative: {}", value);
    }
    if ether.scale() > ETHER_DECIMALS {
        bail!("ether amount has more than {} decimals: {}", ETHER_DECIMALS, value);
    }
    let wei = ether
        .checked_mul(Decimal::from(10u64.pow(ETHER_DECIMALS)))
        .ok_or(anyhow!("ether amount too large: {}", value))?;
    wei.to_u128()
        .ok_or(anyhow!("ether amount out of range: {}", value))
}

/// Wei travels as a decimal string, JSON numbers can't carry u128 safely.
pub mod wei_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Wei;

    pub fn serialize<S: Serializer>(value: &Wei, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Wei, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<Wei>().map_err(serde::de::Error::custom)
    }
}
