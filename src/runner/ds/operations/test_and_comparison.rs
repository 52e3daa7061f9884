use crate::runner::ds::operations::type_conversion::{primitive_to_number, to_number, to_primitive};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::{JsNumberType, JsValue};

/// `SameValue`: like `===` except `NaN` equals `NaN` and `+0` differs from `-0`.
pub fn same_value(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Number(x), JsValue::Number(y)) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x == y && x.is_sign_negative() == y.is_sign_negative()
            }
        }
        _ => strict_equality_comparison(a, b),
    }
}

pub fn strict_equality_comparison(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Number(JsNumberType::Integer(x)), JsValue::Number(JsNumberType::Integer(y))) => x == y,
        (JsValue::Number(x), JsValue::Number(y)) => x.as_f64() == y.as_f64(),
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Boolean(x), JsValue::Boolean(y)) => x == y,
        (JsValue::String(x), JsValue::String(y)) => x == y,
        (JsValue::Object(x), JsValue::Object(y)) => x == y,
        _ => false,
    }
}

pub fn loose_equality_comparison(realm: &Realm, a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Undefined | JsValue::Null, JsValue::Undefined | JsValue::Null) => true,
        (JsValue::Undefined | JsValue::Null, _) | (_, JsValue::Undefined | JsValue::Null) => false,
        (JsValue::Object(x), JsValue::Object(y)) => x == y,
        (JsValue::Object(_), _) => loose_equality_comparison(realm, &to_primitive(realm, a), b),
        (_, JsValue::Object(_)) => loose_equality_comparison(realm, a, &to_primitive(realm, b)),
        (JsValue::String(x), JsValue::String(y)) => x == y,
        (JsValue::Boolean(x), JsValue::Boolean(y)) => x == y,
        _ => match (primitive_to_number(a), primitive_to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Abstract relational comparison `a < b`. `None` stands for "undefined"
/// (a NaN was involved), which every relational operator maps to false.
pub fn less_than(realm: &Realm, a: &JsValue, b: &JsValue) -> Option<bool> {
    let pa = to_primitive(realm, a);
    let pb = to_primitive(realm, b);
    if let (JsValue::String(x), JsValue::String(y)) = (&pa, &pb) {
        return Some(compare_utf16(x, y) == std::cmp::Ordering::Less);
    }
    let x = to_number(realm, &pa);
    let y = to_number(realm, &pb);
    if x.is_nan() || y.is_nan() {
        None
    } else {
        Some(x < y)
    }
}

/// Strings compare by UTF-16 code units, not by scalar values.
pub fn compare_utf16(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_distinguishes_zeroes() {
        assert!(!same_value(&JsValue::from_f64(0.0), &JsValue::from_f64(-0.0)));
        assert!(same_value(&JsValue::from_f64(f64::NAN), &JsValue::from_f64(f64::NAN)));
        assert!(strict_equality_comparison(&JsValue::from_f64(0.0), &JsValue::from_f64(-0.0)));
        assert!(!strict_equality_comparison(&JsValue::from_f64(f64::NAN), &JsValue::from_f64(f64::NAN)));
    }

    #[test]
    fn utf16_ordering() {
        assert_eq!(compare_utf16("a", "b"), std::cmp::Ordering::Less);
        // U+1F600 is the surrogate pair D83D DE00, so U+FF61 sorts after it.
        assert_eq!(compare_utf16("\u{ff61}", "\u{1f600}"), std::cmp::Ordering::Greater);
    }
}
