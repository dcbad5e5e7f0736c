//! Resource names, quantities, and request maps
//!
//! Quantities are held in milli-units of the resource's base unit, so
//! `500m` cpu and `0.5` cpu are the same value. Parsing accepts the
//! conventional decimal (`k`, `M`, `G`, `T`) and binary (`Ki`, `Mi`, `Gi`,
//! `Ti`) suffixes.

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a quota dimension (`cpu`, `memory`, `nvidia.com/gpu`, ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(pub String);

impl ResourceName {
    /// Conventional name for cpu quota
    pub fn cpu() -> Self {
        Self("cpu".to_string())
    }

    /// Conventional name for memory quota
    pub fn memory() -> Self {
        Self("memory".to_string())
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-resource requested or granted amounts
pub type Requests = BTreeMap<ResourceName, Quantity>;

/// A scalar resource amount in milli-units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(i64);

const MILLI: i64 = 1_000;

impl Quantity {
    /// Zero amount
    pub const ZERO: Quantity = Quantity(0);

    /// Build from whole base units
    pub fn from_units(units: i64) -> Self {
        Quantity(units * MILLI)
    }

    /// Build from milli-units
    pub fn from_millis(millis: i64) -> Self {
        Quantity(millis)
    }

    /// Milli-unit value
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// True when the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a quantity literal (`2`, `1.5`, `500m`, `4Gi`, `100k`)
    pub fn parse(s: &str) -> ApiResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ApiError::InvalidQuantity(s.to_string()));
        }
        let split = s
            .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let scale: i64 = match suffix {
            "" => MILLI,
            "m" => 1,
            "k" => MILLI * 1_000,
            "M" => MILLI * 1_000_000,
            "G" => MILLI * 1_000_000_000,
            "T" => MILLI * 1_000_000_000_000,
            "Ki" => MILLI * (1 << 10),
            "Mi" => MILLI * (1 << 20),
            "Gi" => MILLI * (1 << 30),
            "Ti" => MILLI * (1 << 40),
            _ => return Err(ApiError::InvalidQuantity(s.to_string())),
        };
        let value: f64 = number
            .parse()
            .map_err(|_| ApiError::InvalidQuantity(s.to_string()))?;
        if value < 0.0 {
            return Err(ApiError::InvalidQuantity(s.to_string()));
        }
        let millis = value * scale as f64;
        if !millis.is_finite() || millis > i64::MAX as f64 {
            return Err(ApiError::QuantityOverflow);
        }
        Ok(Quantity(millis.round() as i64))
    }

    /// Checked addition
    pub fn checked_add(self, other: Quantity) -> ApiResult<Quantity> {
        self.0
            .checked_add(other.0)
            .map(Quantity)
            .ok_or(ApiError::QuantityOverflow)
    }

    /// Checked subtraction; `None` when the result would be negative
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        let v = self.0 - other.0;
        (v >= 0).then_some(Quantity(v))
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity((self.0 - other.0).max(0))
    }

    /// Scale by a pod count
    pub fn scale(self, count: u32) -> Quantity {
        Quantity(self.0.saturating_mul(count as i64))
    }
}

impl std::ops::Add for Quantity {
    type Output = Quantity;

    fn add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }
}

impl std::ops::AddAssign for Quantity {
    fn add_assign(&mut self, other: Quantity) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % MILLI == 0 {
            write!(f, "{}", self.0 / MILLI)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

/// Sum two request maps resource by resource
pub fn add_requests(into: &mut Requests, from: &Requests) {
    for (name, qty) in from {
        *into.entry(name.clone()).or_default() += *qty;
    }
}
