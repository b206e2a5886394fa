//! Typed vehicle attributes
//!
//! Attributes carry an explicit valid/unavailable state instead of relying on
//! absence-of-field. A fetch failure marks the attribute unavailable; a stale
//! numeric value is never surfaced without that marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit of measurement for numeric attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kilometers,
    Percent,
    Celsius,
    Fahrenheit,
    Ampere,
    Minutes,
    Seconds,
    Days,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Kilometers => "km",
            Unit::Percent => "%",
            Unit::Celsius => "°C",
            Unit::Fahrenheit => "°F",
            Unit::Ampere => "A",
            Unit::Minutes => "min",
            Unit::Seconds => "s",
            Unit::Days => "d",
        }
    }
}

/// A tagged attribute value
///
/// The remote API surfaces loosely shaped JSON; values are normalized into
/// one of these variants at the poller boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Numeric value with unit and display precision (step size, e.g. 0.5)
    Float {
        value: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<Unit>,
        precision: f64,
    },
    /// Integer value (counters, percentages)
    Int {
        value: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        unit: Option<Unit>,
    },
    Bool(bool),
    Text(String),
    /// Enumerated mode reported by the remote service (e.g. "charging")
    Mode(String),
}

impl AttributeValue {
    /// Numeric value with default precision 1.0
    pub fn float(value: f64, unit: Option<Unit>) -> Self {
        Self::Float {
            value,
            unit,
            precision: 1.0,
        }
    }

    /// Numeric value rounded to the given step before storing
    pub fn float_with_precision(value: f64, unit: Option<Unit>, precision: f64) -> Self {
        Self::Float {
            value: round_to_step(value, precision),
            unit,
            precision,
        }
    }

    pub fn int(value: i64, unit: Option<Unit>) -> Self {
        Self::Int { value, unit }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float { value, .. } => Some(*value),
            AttributeValue::Int { value, .. } => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) | AttributeValue::Mode(s) => Some(s),
            _ => None,
        }
    }
}

/// Round a value to the nearest multiple of `step`
///
/// Used for remote-enforced step sizes, e.g. climatisation target temperature
/// accepts only 0.5 °C increments.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

/// A vehicle attribute with explicit validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Current value, `None` when the attribute is unavailable
    value: Option<AttributeValue>,
    /// When the remote service captured the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_at: Option<DateTime<Utc>>,
    /// When the connector last updated this attribute
    pub updated_at: DateTime<Utc>,
}

impl Attribute {
    pub fn new(value: AttributeValue, measured_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: Some(value),
            measured_at,
            updated_at: Utc::now(),
        }
    }

    /// An attribute in the explicit unavailable state
    pub fn unavailable() -> Self {
        Self {
            value: None,
            measured_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    /// The value, only surfaced while valid
    pub fn value(&self) -> Option<&AttributeValue> {
        self.value.as_ref()
    }

    /// Replace the value and refresh timestamps
    pub fn set(&mut self, value: AttributeValue, measured_at: Option<DateTime<Utc>>) {
        self.value = Some(value);
        self.measured_at = measured_at;
        self.updated_at = Utc::now();
    }

    /// Drop into the unavailable state, discarding the stale value
    pub fn mark_unavailable(&mut self) {
        self.value = None;
        self.measured_at = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_to_half_step() {
        assert_eq!(round_to_step(21.3, 0.5), 21.5);
        assert_eq!(round_to_step(21.2, 0.5), 21.0);
        assert_eq!(round_to_step(16.0, 0.5), 16.0);
    }

    #[test]
    fn round_with_zero_step_is_identity() {
        assert_eq!(round_to_step(12.34, 0.0), 12.34);
    }

    #[test]
    fn float_with_precision_rounds_on_construction() {
        let v = AttributeValue::float_with_precision(21.26, Some(Unit::Celsius), 0.5);
        assert_eq!(v.as_f64(), Some(21.5));
    }

    #[test]
    fn unavailable_attribute_surfaces_no_value() {
        let mut attr = Attribute::new(AttributeValue::int(42_000, Some(Unit::Kilometers)), None);
        assert!(attr.is_valid());
        attr.mark_unavailable();
        assert!(!attr.is_valid());
        assert_eq!(attr.value(), None);
    }
}
