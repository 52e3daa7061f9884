//! String built-in.
//!
//! Like `Number`, `String` only converts. Lengths and char codes count
//! UTF-16 code units.

use crate::runner::ds::error::JErrorType;
use crate::runner::ds::operations::type_conversion::{to_number, to_string, to_uint32};
use crate::runner::ds::realm::Realm;
use crate::runner::ds::value::JsValue;
use crate::runner::jit::vm::Vm;

use super::core::{native_function, BuiltInObject};

pub fn install(realm: &mut Realm) {
    let id = native_function(realm, "String", string_call, None, 1, None);
    BuiltInObject::on(realm, id)
        .add_method("fromCharCode", string_from_char_code, 1)
        .register_global("String");
}

fn string_call(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    match args.first() {
        None => Ok(JsValue::from("")),
        Some(v) => Ok(JsValue::String(to_string(&vm.realm, v))),
    }
}

/// String.fromCharCode. Unpaired surrogates become U+FFFD.
fn string_from_char_code(vm: &mut Vm, _this: JsValue, args: &[JsValue]) -> Result<JsValue, JErrorType> {
    let units: Vec<u16> = args
        .iter()
        .map(|v| (to_uint32(to_number(&vm.realm, v)) & 0xFFFF) as u16)
        .collect();
    Ok(JsValue::from(String::from_utf16_lossy(&units)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::config::EngineOptions;

    #[test]
    fn from_char_code_joins_surrogate_pairs() {
        let mut vm = Vm::new(Realm::new(), EngineOptions::default());
        let args = [JsValue::from_i32(0xD83D), JsValue::from_i32(0xDE00), JsValue::from_i32(65 + 0x10000)];
        let result = string_from_char_code(&mut vm, JsValue::Undefined, &args).unwrap();
        assert_eq!(result, JsValue::from("\u{1F600}A"));
    }
}
