use std::sync::Arc;

use crate::runner::ds::object::{ObjectClass, ObjectId};
use crate::runner::ds::operations::object::{get, typed_array_length, typed_array_read};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::{JsNumberType, JsValue};

pub const TYPE_STR_UNDEFINED: &str = "undefined";
pub const TYPE_STR_BOOLEAN: &str = "boolean";
pub const TYPE_STR_STRING: &str = "string";
pub const TYPE_STR_NUMBER: &str = "number";
pub const TYPE_STR_OBJECT: &str = "object";
pub const TYPE_STR_FUNCTION: &str = "function";

/// Objects nested deeper than this inside array-to-string conversions are
/// printed as empty, which also breaks reference cycles.
const MAX_TO_STRING_DEPTH: usize = 16;

pub fn get_type(realm: &Realm, v: &JsValue) -> &'static str {
    match v {
        JsValue::Undefined => TYPE_STR_UNDEFINED,
        JsValue::Null => TYPE_STR_OBJECT,
        JsValue::Boolean(_) => TYPE_STR_BOOLEAN,
        JsValue::String(_) => TYPE_STR_STRING,
        JsValue::Number(_) => TYPE_STR_NUMBER,
        JsValue::Object(id) => {
            if realm.heap.get(*id).class.is_callable() {
                TYPE_STR_FUNCTION
            } else {
                TYPE_STR_OBJECT
            }
        }
    }
}

pub fn to_boolean(v: &JsValue) -> bool {
    match v {
        JsValue::Undefined | JsValue::Null => false,
        JsValue::Boolean(b) => *b,
        JsValue::String(s) => !s.is_empty(),
        JsValue::Number(JsNumberType::Integer(i)) => *i != 0,
        JsValue::Number(JsNumberType::Float(f)) => !(*f == 0.0 || f.is_nan()),
        JsValue::Object(_) => true,
    }
}

/// `ToNumber` for values that are already primitive. Returns `None` for
/// objects, which need the realm to be converted.
pub fn primitive_to_number(v: &JsValue) -> Option<f64> {
    match v {
        JsValue::Undefined => Some(f64::NAN),
        JsValue::Null => Some(0.0),
        JsValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsValue::String(s) => Some(string_to_number(s)),
        JsValue::Number(n) => Some(n.as_f64()),
        JsValue::Object(_) => None,
    }
}

pub fn to_number(realm: &Realm, v: &JsValue) -> f64 {
    match primitive_to_number(v) {
        Some(n) => n,
        None => match v {
            JsValue::Object(id) => string_to_number(&object_to_string(realm, *id, 0)),
            _ => f64::NAN,
        },
    }
}

pub fn to_primitive(realm: &Realm, v: &JsValue) -> JsValue {
    match v {
        JsValue::Object(id) => JsValue::String(Arc::from(object_to_string(realm, *id, 0))),
        _ => v.clone(),
    }
}

pub fn to_string(realm: &Realm, v: &JsValue) -> Arc<str> {
    match v {
        JsValue::String(s) => s.clone(),
        JsValue::Object(id) => Arc::from(object_to_string(realm, *id, 0)),
        _ => Arc::from(primitive_to_string(v)),
    }
}

pub fn primitive_to_string(v: &JsValue) -> String {
    match v {
        JsValue::Undefined => "undefined".to_string(),
        JsValue::Null => "null".to_string(),
        JsValue::Boolean(b) => b.to_string(),
        JsValue::String(s) => s.to_string(),
        JsValue::Number(JsNumberType::Integer(i)) => i.to_string(),
        JsValue::Number(JsNumberType::Float(f)) => number_to_string(*f),
        JsValue::Object(id) => format!("[object #{}]", id.0),
    }
}

pub fn to_property_key(realm: &Realm, v: &JsValue) -> Arc<str> {
    match v {
        JsValue::Number(JsNumberType::Integer(i)) => Arc::from(i.to_string()),
        _ => to_string(realm, v),
    }
}

/// Default string conversion of objects. User `toString`/`valueOf` methods are
/// not consulted.
fn object_to_string(realm: &Realm, id: ObjectId, depth: usize) -> String {
    if depth > MAX_TO_STRING_DEPTH {
        return String::new();
    }
    let object = realm.heap.get(id);
    match &object.class {
        ObjectClass::Array(elements) => elements
            .iter()
            .map(|e| element_to_string(realm, e, depth))
            .collect::<Vec<_>>()
            .join(","),
        ObjectClass::TypedArray(t) => {
            (0..typed_array_length(realm, t))
                .map(|i| primitive_to_string(&typed_array_read(realm, t, i)))
                .collect::<Vec<_>>()
                .join(",")
        }
        ObjectClass::Function(f) => f.template.function.source_text.to_string(),
        ObjectClass::NativeFunction(f) => format!("function {}() {{\n    [native code]\n}}", f.name),
        ObjectClass::Error => {
            let name = get(realm, id, "name");
            let message = get(realm, id, "message");
            let name = match name {
                JsValue::Undefined => "Error".to_string(),
                other => element_to_string(realm, &other, depth),
            };
            let message = match message {
                JsValue::Undefined => String::new(),
                other => element_to_string(realm, &other, depth),
            };
            if message.is_empty() {
                name
            } else if name.is_empty() {
                message
            } else {
                format!("{}: {}", name, message)
            }
        }
        ObjectClass::ArrayBuffer(_) => "[object ArrayBuffer]".to_string(),
        ObjectClass::Ordinary => "[object Object]".to_string(),
    }
}

fn element_to_string(realm: &Realm, v: &JsValue, depth: usize) -> String {
    match v {
        JsValue::Undefined | JsValue::Null => String::new(),
        JsValue::Object(id) => object_to_string(realm, *id, depth + 1),
        _ => primitive_to_string(v),
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let (radix, digits) = if let Some(rest) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        (16, rest)
    } else if let Some(rest) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        (2, rest)
    } else if let Some(rest) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        (8, rest)
    } else {
        (10, t)
    };
    if radix != 10 {
        if digits.is_empty() {
            return f64::NAN;
        }
        let mut value = 0f64;
        for c in digits.chars() {
            match c.to_digit(radix) {
                Some(d) => value = value * radix as f64 + d as f64,
                None => return f64::NAN,
            }
        }
        return value;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf", "nan" and friends; JS does not.
    if t
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
    {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Number-to-string conversion following the shortest round-trip digits
/// and the JS placement rules for the decimal point and exponent.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let sign = if n < 0.0 { "-" } else { "" };
    let formatted = format!("{:e}", n.abs());
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some(parts) => parts,
        None => return formatted,
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exponent + 1;

    let body = if k <= point && point <= 21 {
        format!("{}{}", digits, "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        format!("{}.{}", &digits[..point as usize], &digits[point as usize..])
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else {
        let exp = point - 1;
        let exp_sign = if exp < 0 { "-" } else { "+" };
        if k == 1 {
            format!("{}e{}{}", digits, exp_sign, exp.abs())
        } else {
            format!("{}.{}e{}{}", &digits[..1], &digits[1..], exp_sign, exp.abs())
        }
    };
    format!("{}{}", sign, body)
}

pub fn to_integer_or_infinity(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else if n.is_infinite() {
        n
    } else {
        n.trunc()
    }
}

pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let int = n.trunc();
    let modulo = int.rem_euclid(4294967296.0);
    modulo as u32
}

/// Returns the array index denoted by `key` if it is a canonical numeric
/// string in the index range.
pub fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || key.len() > 10 {
        return None;
    }
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match key.parse::<u64>() {
        Ok(i) if i < u32::MAX as u64 => Some(i as u32),
        _ => None,
    }
}

/// Resolves a relative index argument (`start`/`end` of `subarray`, `fill`)
/// against `len`.
pub fn relative_index(arg: Option<f64>, len: usize, default: usize) -> usize {
    match arg {
        None => default,
        Some(n) => {
            let rel = to_integer_or_infinity(n);
            if rel < 0.0 {
                (len as f64 + rel).max(0.0) as usize
            } else {
                rel.min(len as f64) as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting_matches_js() {
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(123456789.125), "123456789.125");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(-2.5e-10), "-2.5e-10");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn string_conversions() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert_eq!(string_to_number(""), 0.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn int32_wrapping() {
        assert_eq!(to_int32(4294967295.0), -1);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_uint32(-1.0), 4294967295);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(-1.9), -1);
    }

    #[test]
    fn index_keys() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("17"), Some(17));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("4294967295"), None);
    }

    #[test]
    fn relative_indices() {
        assert_eq!(relative_index(Some(-2.0), 10, 0), 8);
        assert_eq!(relative_index(Some(20.0), 10, 0), 10);
        assert_eq!(relative_index(None, 10, 10), 10);
        assert_eq!(relative_index(Some(f64::NEG_INFINITY), 10, 0), 0);
    }
}
