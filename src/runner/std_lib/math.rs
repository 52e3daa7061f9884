//! Math built-in object.
//!
//! The functions the optimizing tier knows (`abs`, `floor`, `fround`,
//! `min`, ...) carry an intrinsic tag and share their arithmetic with it
//! through `math_intrinsic`, so every tier rounds the same way.

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::object::Intrinsic;
use crate::runner::ds::operations::type_conversion::{to_int32, to_number, to_uint32};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::runtime::{js_pow, math_intrinsic};
use crate::runner::jit::vm::Vm;

use super::core::BuiltInObject;

pub fn install(realm: &mut Realm) {
    BuiltInObject::new(realm)
        .add_constant("PI", JsValue::from_f64(std::f64::consts::PI))
        .add_constant("E", JsValue::from_f64(std::f64::consts::E))
        .add_constant("LN2", JsValue::from_f64(std::f64::consts::LN_2))
        .add_constant("LN10", JsValue::from_f64(std::f64::consts::LN_10))
        .add_constant("SQRT2", JsValue::from_f64(std::f64::consts::SQRT_2))
        .add_intrinsic("abs", math_abs, 1, Intrinsic::MathAbs)
        .add_intrinsic("floor", math_floor, 1, Intrinsic::MathFloor)
        .add_intrinsic("ceil", math_ceil, 1, Intrinsic::MathCeil)
        .add_intrinsic("trunc", math_trunc, 1, Intrinsic::MathTrunc)
        .add_intrinsic("sqrt", math_sqrt, 1, Intrinsic::MathSqrt)
        .add_intrinsic("fround", math_fround, 1, Intrinsic::MathFround)
        .add_intrinsic("f16round", math_f16round, 1, Intrinsic::MathF16Round)
        .add_intrinsic("min", math_min, 2, Intrinsic::MathMin)
        .add_intrinsic("max", math_max, 2, Intrinsic::MathMax)
        .add_method("round", math_round, 1)
        .add_method("sign", math_sign, 1)
        .add_method("cbrt", math_cbrt, 1)
        .add_method("pow", math_pow, 2)
        .add_method("exp", math_exp, 1)
        .add_method("log", math_log, 1)
        .add_method("sin", math_sin, 1)
        .add_method("cos", math_cos, 1)
        .add_method("tan", math_tan, 1)
        .add_method("atan2", math_atan2, 2)
        .add_method("hypot", math_hypot, 2)
        .add_method("imul", math_imul, 2)
        .add_method("clz32", math_clz32, 1)
        .register_global("Math");
}

fn numbers(vm: &Vm, args: &[JsValue]) -> Vec<f64> {
    args.iter().map(|v| to_number(&vm.realm, v)).collect()
}

fn first(vm: &Vm, args: &[JsValue]) -> f64 {
    args.first().map(|v| to_number(&vm.realm, v)).unwrap_or(f64::NAN)
}

fn second(vm: &Vm, args: &[JsValue]) -> f64 {
    args.get(1).map(|v| to_number(&vm.realm, v)).unwrap_or(f64::NAN)
}

fn intrinsic(vm: &Vm, args: &[JsValue], which: Intrinsic) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(math_intrinsic(which, &numbers(vm, args))))
}

fn unary(vm: &Vm, args: &[JsValue], f: fn(f64) -> f64) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(f(first(vm, args))))
}

fn math_abs(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathAbs)
}

fn math_floor(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathFloor)
}

fn math_ceil(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathCeil)
}

fn math_trunc(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathTrunc)
}

fn math_sqrt(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathSqrt)
}

fn math_fround(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathFround)
}

fn math_f16round(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathF16Round)
}

fn math_min(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathMin)
}

fn math_max(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    intrinsic(vm, args, Intrinsic::MathMax)
}

/// Rounds half up, keeping the sign of zero.
fn round(x: f64) -> f64 {
    if !x.is_finite() || x == 0.0 {
        return x;
    }
    if x > 0.0 && x < 0.5 {
        return 0.0;
    }
    if x < 0.0 && x >= -0.5 {
        return -0.0;
    }
    (x + 0.5).floor()
}

fn math_round(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, round)
}

fn math_sign(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, |x| if x.is_nan() || x == 0.0 { x } else { x.signum() })
}

fn math_cbrt(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::cbrt)
}

fn math_pow(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(js_pow(first(vm, args), second(vm, args))))
}

fn math_exp(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::exp)
}

fn math_log(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::ln)
}

fn math_sin(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::sin)
}

fn math_cos(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::cos)
}

fn math_tan(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    unary(vm, args, f64::tan)
}

fn math_atan2(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_f64(first(vm, args).atan2(second(vm, args))))
}

fn math_hypot(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let values = numbers(vm, args);
    if values.iter().any(|x| x.is_infinite()) {
        return Ok(JsValue::from_f64(f64::INFINITY));
    }
    let sum: f64 = values.iter().map(|x| x * x).sum();
    Ok(JsValue::from_f64(sum.sqrt()))
}

fn math_imul(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let (a, b) = (to_int32(first(vm, args)), to_int32(second(vm, args)));
    Ok(JsValue::from_i32(a.wrapping_mul(b)))
}

fn math_clz32(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    Ok(JsValue::from_i32(to_uint32(first(vm, args)).leading_zeros() as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_matches_js() {
        assert_eq!(round(2.5), 3.0);
        assert_eq!(round(-2.5), -2.0);
        assert!(round(-0.4).is_sign_negative());
        assert_eq!(round(0.49999999999999994), 0.0);
    }
}
