//! Number built-in.
//!
//! `Number` converts its argument; there are no wrapper objects, so it is
//! not a constructor.

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::operations::type_conversion::{to_integer_or_infinity, to_number, to_string};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::vm::Vm;

use super::core::{arg, define_global_function, native_function, BuiltInObject};

const MAX_SAFE_INTEGER: f64 = 9007199254740991.0;

pub fn install(realm: &mut Realm) {
    let id = native_function(realm, "Number", number_call, None, 1, None);
    BuiltInObject::on(realm, id)
        .add_constant("MAX_VALUE", JsValue::from_f64(f64::MAX))
        .add_constant("MIN_VALUE", JsValue::from_f64(5e-324))
        .add_constant("POSITIVE_INFINITY", JsValue::from_f64(f64::INFINITY))
        .add_constant("NEGATIVE_INFINITY", JsValue::from_f64(f64::NEG_INFINITY))
        .add_constant("NaN", JsValue::from_f64(f64::NAN))
        .add_constant("MAX_SAFE_INTEGER", JsValue::from_f64(MAX_SAFE_INTEGER))
        .add_constant("MIN_SAFE_INTEGER", JsValue::from_f64(-MAX_SAFE_INTEGER))
        .add_constant("EPSILON", JsValue::from_f64(f64::EPSILON))
        .add_method("isNaN", number_is_nan, 1)
        .add_method("isFinite", number_is_finite, 1)
        .add_method("isInteger", number_is_integer, 1)
        .add_method("isSafeInteger", number_is_safe_integer, 1)
        .add_method("parseFloat", parse_float, 1)
        .add_method("parseInt", parse_int, 2)
        .register_global("Number");
    define_global_function(realm, "parseFloat", parse_float, 1, None);
    define_global_function(realm, "parseInt", parse_int, 2, None);
}

fn number_call(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    match args.first() {
        None => Ok(JsValue::from_i32(0)),
        Some(v) => Ok(JsValue::from_f64(to_number(&vm.realm, v))),
    }
}

/// The argument when it is a number; the `Number.is*` predicates do not
/// convert.
fn number_arg(args: &[JsValue]) -> Option<f64> {
    args.first().and_then(JsValue::as_number)
}

fn number_is_nan(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(number_arg(args).is_some_and(f64::is_nan)))
}

fn number_is_finite(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(number_arg(args).is_some_and(f64::is_finite)))
}

fn number_is_integer(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::Boolean(number_arg(args).is_some_and(|n| n.is_finite() && n.trunc() == n)))
}

fn number_is_safe_integer(_vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let safe = number_arg(args).is_some_and(|n| n.is_finite() && n.trunc() == n && n.abs() <= MAX_SAFE_INTEGER);
    Ok(JsValue::Boolean(safe))
}

/// Length of the longest prefix of `s` that reads as a decimal literal.
fn decimal_prefix(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    if s[i..].starts_with("Infinity") {
        return i + "Infinity".len();
    }
    let digits = |i: &mut usize| {
        let start = *i;
        while *i < bytes.len() && bytes[*i].is_ascii_digit() {
            *i += 1;
        }
        *i > start
    };
    let mut seen = digits(&mut i);
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        if digits(&mut j) || seen {
            seen = true;
            i = j;
        }
    }
    if !seen {
        return 0;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if digits(&mut j) {
            i = j;
        }
    }
    i
}

fn parse_float(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let text = to_string(&vm.realm, &arg(args, 0));
    let s = text.trim_start();
    let end = decimal_prefix(s);
    let n = match &s[..end] {
        "" => f64::NAN,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        prefix => prefix.parse().unwrap_or(f64::NAN),
    };
    Ok(JsValue::from_f64(n))
}

fn parse_int(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let text = to_string(&vm.realm, &arg(args, 0));
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let mut radix = match arg(args, 1) {
        JsValue::Undefined => 0,
        other => to_integer_or_infinity(to_number(&vm.realm, &other)) as i64,
    };
    if radix != 0 && !(2..=36).contains(&radix) {
        return Ok(JsValue::from_f64(f64::NAN));
    }
    if (radix == 0 || radix == 16) && (s.starts_with("0x") || s.starts_with("0X")) {
        s = &s[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix as u32)).collect();
    if digits.is_empty() {
        return Ok(JsValue::from_f64(f64::NAN));
    }
    let n = digits.iter().fold(0.0, |acc, d| acc * radix as f64 + *d as f64);
    Ok(JsValue::from_f64(if negative { -n } else { n }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_prefixes() {
        assert_eq!(decimal_prefix("3.25abc"), 4);
        assert_eq!(decimal_prefix(".5"), 2);
        assert_eq!(decimal_prefix("1e5x"), 3);
        assert_eq!(decimal_prefix("1e"), 1);
        assert_eq!(decimal_prefix("-Infinityx"), 9);
        assert_eq!(decimal_prefix("abc"), 0);
    }
}
