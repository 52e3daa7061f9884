use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::runner::ds::object::ObjectId;
use crate::runner::ds::operations::type_conversion::number_to_string;

/// Numbers are kept as `Integer` whenever the value is an int32 (and not -0),
/// which is what the int32 IC stubs and optimizer guards key on.
#[derive(Clone, Copy, Debug)]
pub enum JsNumberType {
    Integer(i32),
    Float(f64),
}

impl JsNumberType {
    pub fn from_f64(f: f64) -> Self {
        if f.fract() == 0.0
            && f >= i32::MIN as f64
            && f <= i32::MAX as f64
            && !(f == 0.0 && f.is_sign_negative())
        {
            JsNumberType::Integer(f as i32)
        } else {
            JsNumberType::Float(f)
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            JsNumberType::Integer(i) => *i as f64,
            JsNumberType::Float(f) => *f,
        }
    }
}

impl Display for JsNumberType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsNumberType::Integer(i) => write!(f, "{}", i),
            JsNumberType::Float(n) => write!(f, "{}", number_to_string(*n)),
        }
    }
}

/// Dynamic type of a value as seen by IC guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Undefined,
    Null,
    Boolean,
    Int32,
    Double,
    String,
    Object,
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Undefined => "Undefined",
            TypeTag::Null => "Null",
            TypeTag::Boolean => "Boolean",
            TypeTag::Int32 => "Int32",
            TypeTag::Double => "Double",
            TypeTag::String => "String",
            TypeTag::Object => "Object",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, TypeTag::Int32 | TypeTag::Double)
    }
}

/// A JavaScript value. Objects are handles into the realm heap; strings are
/// shared immutable buffers so values can cross to compile threads.
#[derive(Clone, Debug)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    String(Arc<str>),
    Number(JsNumberType),
    Object(ObjectId),
}

impl JsValue {
    pub fn from_f64(f: f64) -> Self {
        JsValue::Number(JsNumberType::from_f64(f))
    }

    pub fn from_i32(i: i32) -> Self {
        JsValue::Number(JsNumberType::Integer(i))
    }

    pub fn string(s: &str) -> Self {
        JsValue::String(Arc::from(s))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            JsValue::Undefined => TypeTag::Undefined,
            JsValue::Null => TypeTag::Null,
            JsValue::Boolean(_) => TypeTag::Boolean,
            JsValue::String(_) => TypeTag::String,
            JsValue::Number(JsNumberType::Integer(_)) => TypeTag::Int32,
            JsValue::Number(JsNumberType::Float(_)) => TypeTag::Double,
            JsValue::Object(_) => TypeTag::Object,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Number(n) => Some(n.as_f64()),
            _ => None,
        }
    }

    pub fn as_int32(&self) -> Option<i32> {
        match self {
            JsValue::Number(JsNumberType::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            JsValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }
}

impl Default for JsValue {
    fn default() -> Self {
        JsValue::Undefined
    }
}

/// Equality follows SameValueZero: `NaN` equals `NaN`, `+0` equals `-0`, and
/// `Integer(1)` equals `Float(1.0)`.
impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                a == b || (a.is_nan() && b.is_nan())
            }
            _ => false,
        }
    }
}

impl Display for JsValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "undefined"),
            JsValue::Null => write!(f, "null"),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::String(s) => write!(f, "{}", s),
            JsValue::Number(n) => write!(f, "{}", n),
            JsValue::Object(id) => write!(f, "[object #{}]", id.0),
        }
    }
}

impl From<i32> for JsValue {
    fn from(i: i32) -> Self {
        JsValue::from_i32(i)
    }
}

impl From<f64> for JsValue {
    fn from(f: f64) -> Self {
        JsValue::from_f64(f)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::string(s)
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(Arc::from(s.as_str()))
    }
}

impl From<ObjectId> for JsValue {
    fn from(id: ObjectId) -> Self {
        JsValue::Object(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_normalization() {
        assert_eq!(JsValue::from_f64(3.0).type_tag(), TypeTag::Int32);
        assert_eq!(JsValue::from_f64(-0.0).type_tag(), TypeTag::Double);
        assert_eq!(JsValue::from_f64(2147483648.0).type_tag(), TypeTag::Double);
        assert_eq!(JsValue::from_f64(0.5).type_tag(), TypeTag::Double);
    }

    #[test]
    fn same_value_zero_equality() {
        assert_eq!(JsValue::from_f64(f64::NAN), JsValue::from_f64(f64::NAN));
        assert_eq!(JsValue::from(1), JsValue::Number(JsNumberType::Float(1.0)));
        assert_ne!(JsValue::from("1"), JsValue::from(1));
    }
}
