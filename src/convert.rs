//! Scalar coercions between source values and simple target kinds.
//!
//! Conversions are total over the support table: `is_supported` answers
//! without side effects, `convert` either produces the target kind or says
//! why it cannot. Lossy numeric narrowing is refused rather than truncated.

use ordered_float::OrderedFloat;

use crate::node::Scalar;
use crate::types::TypeRef;
use crate::value::Value;

/// The four kinds a scalar conversion can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleKind {
    Bool,
    Int,
    Float,
    Str,
}

impl SimpleKind {
    pub fn of(ty: &TypeRef) -> Option<SimpleKind> {
        match ty {
            TypeRef::Bool => Some(SimpleKind::Bool),
            TypeRef::Int => Some(SimpleKind::Int),
            TypeRef::Float => Some(SimpleKind::Float),
            TypeRef::Str => Some(SimpleKind::Str),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SimpleKind::Bool => "boolean",
            SimpleKind::Int => "int",
            SimpleKind::Float => "double",
            SimpleKind::Str => "string",
        }
    }
}

/// Stateless conversion service. One instance lives for the duration of a
/// resolve call; nothing here retains state between conversions.
#[derive(Debug, Default, Clone, Copy)]
pub struct Converter;

impl Converter {
    pub fn new() -> Self {
        Converter
    }

    /// Whether `convert` can in principle succeed for this source/target
    /// pair. String sources answer true for numeric targets even though the
    /// parse may still fail; that failure is a conversion error, not a
    /// missing table entry.
    pub fn is_supported(&self, from: &Scalar, to: SimpleKind) -> bool {
        match (from, to) {
            (Scalar::Null, _) => false,
            (_, SimpleKind::Str) => true,
            (Scalar::Bool(_), _) => true,
            (Scalar::Int(_), _) => true,
            (Scalar::Float(_), SimpleKind::Int | SimpleKind::Float) => true,
            (Scalar::Float(_), SimpleKind::Bool) => false,
            (Scalar::Str(_), _) => true,
        }
    }

    pub fn convert(&self, from: &Scalar, to: SimpleKind) -> Result<Value, String> {
        match to {
            SimpleKind::Bool => self.to_bool(from).map(Value::Bool),
            SimpleKind::Int => self.to_int(from).map(Value::Int),
            SimpleKind::Float => self.to_float(from).map(|f| Value::Float(OrderedFloat(f))),
            SimpleKind::Str => self.to_str(from).map(Value::Str),
        }
    }

    /// Does a scalar already have the target kind, no conversion needed?
    pub fn matches(&self, from: &Scalar, to: SimpleKind) -> bool {
        matches!(
            (from, to),
            (Scalar::Bool(_), SimpleKind::Bool)
                | (Scalar::Int(_), SimpleKind::Int)
                | (Scalar::Float(_), SimpleKind::Float)
                | (Scalar::Str(_), SimpleKind::Str)
        )
    }

    /// Convert an already-resolved value; used for root-type coercion.
    pub fn convert_value(&self, from: &Value, to: SimpleKind) -> Result<Value, String> {
        let scalar = match from {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Int(i) => Scalar::Int(*i),
            Value::Float(f) => Scalar::Float(*f),
            Value::Str(s) => Scalar::Str(s.clone()),
            other => {
                return Err(format!(
                    "no conversion from {} to {}",
                    other.kind(),
                    to.name()
                ))
            }
        };
        self.convert(&scalar, to)
    }

    fn to_bool(&self, from: &Scalar) -> Result<bool, String> {
        match from {
            Scalar::Bool(b) => Ok(*b),
            Scalar::Int(0) => Ok(false),
            Scalar::Int(1) => Ok(true),
            Scalar::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Scalar::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(format!("cannot convert {} to boolean", other.kind())),
        }
    }

    fn to_int(&self, from: &Scalar) -> Result<i64, String> {
        match from {
            Scalar::Int(i) => Ok(*i),
            Scalar::Bool(b) => Ok(*b as i64),
            Scalar::Float(f) if f.0.fract() == 0.0 && f.0.abs() < (i64::MAX as f64) => {
                Ok(f.0 as i64)
            }
            Scalar::Float(f) => Err(format!("cannot convert {} to int without loss", f.0)),
            Scalar::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("cannot parse `{s}` as int: {e}")),
            Scalar::Null => Err("cannot convert null to int".to_string()),
        }
    }

    fn to_float(&self, from: &Scalar) -> Result<f64, String> {
        match from {
            Scalar::Float(f) => Ok(f.0),
            Scalar::Int(i) => Ok(*i as f64),
            Scalar::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Scalar::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("cannot parse `{s}` as double: {e}")),
            Scalar::Null => Err("cannot convert null to double".to_string()),
        }
    }

    fn to_str(&self, from: &Scalar) -> Result<String, String> {
        match from {
            Scalar::Str(s) => Ok(s.clone()),
            Scalar::Bool(b) => Ok(b.to_string()),
            Scalar::Int(i) => Ok(i.to_string()),
            Scalar::Float(f) => Ok(f.0.to_string()),
            Scalar::Null => Err("cannot convert null to string".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_widening_and_exact_narrowing() {
        let c = Converter::new();
        assert_eq!(
            c.convert(&Scalar::Int(3), SimpleKind::Float).unwrap(),
            Value::Float(OrderedFloat(3.0))
        );
        assert_eq!(
            c.convert(&Scalar::Float(OrderedFloat(4.0)), SimpleKind::Int)
                .unwrap(),
            Value::Int(4)
        );
        assert!(c
            .convert(&Scalar::Float(OrderedFloat(4.5)), SimpleKind::Int)
            .is_err());
    }

    #[test]
    fn string_round_trips() {
        let c = Converter::new();
        assert_eq!(
            c.convert(&Scalar::Str("42".into()), SimpleKind::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            c.convert(&Scalar::Int(42), SimpleKind::Str).unwrap(),
            Value::Str("42".into())
        );
        assert_eq!(
            c.convert(&Scalar::Str("TRUE".into()), SimpleKind::Bool)
                .unwrap(),
            Value::Bool(true)
        );
        assert!(c
            .convert(&Scalar::Str("maybe".into()), SimpleKind::Bool)
            .is_err());
    }

    #[test]
    fn null_converts_to_nothing() {
        let c = Converter::new();
        for kind in [
            SimpleKind::Bool,
            SimpleKind::Int,
            SimpleKind::Float,
            SimpleKind::Str,
        ] {
            assert!(!c.is_supported(&Scalar::Null, kind));
            assert!(c.convert(&Scalar::Null, kind).is_err());
        }
    }
}
