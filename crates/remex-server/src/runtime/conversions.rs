//! Wire value <-> JavaScript value conversions
//!
//! # Type Mapping
//!
//! | wire `Value`     | JavaScript                              |
//! |------------------|-----------------------------------------|
//! | `Null`           | `null` (and `undefined` on the way out) |
//! | `Bool`           | boolean                                 |
//! | `Int` / `Float`  | number                                  |
//! | `Str`            | string                                  |
//! | `Symbol`         | `Symbol(name)`                          |
//! | `List`           | Array                                   |
//! | `Map`            | plain object                            |
//! | `FnRef`          | `{ __remexFnRef: arity }` marker object |
//! | `Error`          | string holding the message              |
//!
//! Outbound, any callable becomes `FnRef` with the function's `length` as
//! arity. Numbers that are integral and within the exact float range become
//! `Int`. NaN and the infinities have no JSON form and become `Null`.

use std::collections::BTreeMap;

use boa_engine::{
    js_string,
    object::{builtins::JsArray, JsObject},
    property::PropertyKey,
    value::JsValue,
    Context, JsNativeError, JsResult, JsString, JsSymbol,
};
use remex_common::{Value, MAX_MESSAGE_SIZE, MAX_VALUE_DEPTH};

/// Property marking an object as a remote function reference.
pub(crate) const FN_REF_MARKER: &str = "__remexFnRef";

/// Largest magnitude at which every integer is exactly representable.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Longest array that could still fit in one frame; the smallest encoded
/// element, `{"t":"null"},`, takes 13 bytes.
const MAX_LIST_LEN: u64 = (MAX_MESSAGE_SIZE / 13) as u64;

/// Converts a wire value into a JavaScript value.
pub(crate) fn value_to_js(value: Value, ctx: &mut Context) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::new(b)),
        Value::Int(i) => Ok(match i32::try_from(i) {
            Ok(small) => JsValue::new(small),
            Err(_) => JsValue::new(i as f64),
        }),
        Value::Float(f) => Ok(JsValue::new(f)),
        Value::Str(s) | Value::Error(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        Value::Symbol(name) => JsSymbol::new(Some(JsString::from(name.as_str())))
            .map(JsValue::new)
            .ok_or_else(|| JsNativeError::range().with_message("symbol space exhausted").into()),
        Value::List(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(value_to_js(item, ctx)?);
            }
            Ok(JsArray::from_iter(elements, ctx).into())
        }
        Value::Map(map) => {
            let object = JsObject::with_object_proto(ctx.intrinsics());
            for (key, item) in map {
                let item = value_to_js(item, ctx)?;
                object.create_data_property_or_throw(JsString::from(key.as_str()), item, ctx)?;
            }
            Ok(object.into())
        }
        Value::FnRef { arity } => {
            let object = JsObject::with_object_proto(ctx.intrinsics());
            object.create_data_property_or_throw(
                JsString::from(FN_REF_MARKER),
                JsValue::new(arity as f64),
                ctx,
            )?;
            Ok(object.into())
        }
    }
}

/// Converts a JavaScript value into a wire value.
///
/// Values nested deeper than [`MAX_VALUE_DEPTH`] (including cycles) and
/// arrays too long for a frame are rejected with a `RangeError`.
pub(crate) fn js_to_value(value: &JsValue, ctx: &mut Context) -> JsResult<Value> {
    convert(value, ctx, 1)
}

fn convert(value: &JsValue, ctx: &mut Context, depth: usize) -> JsResult<Value> {
    if depth > MAX_VALUE_DEPTH {
        return Err(JsNativeError::range()
            .with_message("value is nested too deeply to transmit")
            .into());
    }

    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }

    if let Some(n) = value.as_number() {
        return Ok(number_to_value(n));
    }

    if let Some(s) = value.as_string() {
        return Ok(Value::Str(s.to_std_string_escaped()));
    }

    if let Some(symbol) = value.as_symbol() {
        let name = symbol
            .description()
            .map(|d| d.to_std_string_escaped())
            .unwrap_or_default();
        return Ok(Value::Symbol(name));
    }

    if value.is_bigint() {
        let text = value.to_string(ctx)?.to_std_string_escaped();
        return Ok(text.parse::<i64>().map(Value::Int).unwrap_or(Value::Str(text)));
    }

    let Some(object) = value.as_object() else {
        return Ok(Value::Null);
    };
    let object = object.clone();

    if object.is_callable() {
        return Ok(Value::FnRef {
            arity: function_arity(&object, ctx)?,
        });
    }

    if object.is_array() {
        let array = JsArray::from_object(object)?;
        let length = array.length(ctx)?;
        if length > MAX_LIST_LEN {
            return Err(JsNativeError::range()
                .with_message(format!("array of length {} is too long to transmit", length))
                .into());
        }
        let length = length as usize;
        let mut items = Vec::with_capacity(length.min(1 << 16));
        for i in 0..length {
            let element = array.get(i, ctx)?;
            items.push(convert(&element, ctx, depth + 1)?);
        }
        return Ok(Value::List(items));
    }

    let marker = JsString::from(FN_REF_MARKER);
    if object.has_own_property(marker.clone(), ctx)? {
        let arity = object.get(marker, ctx)?.as_number().unwrap_or(0.0);
        return Ok(Value::FnRef {
            arity: arity.max(0.0) as usize,
        });
    }

    let mut map = BTreeMap::new();
    for key in object.own_property_keys(ctx)? {
        let name = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };
        let item = object.get(key, ctx)?;
        map.insert(name, convert(&item, ctx, depth + 1)?);
    }
    Ok(Value::Map(map))
}

/// The declared parameter count of a callable (`fn.length`).
pub(crate) fn function_arity(object: &JsObject, ctx: &mut Context) -> JsResult<usize> {
    let length = object.get(js_string!("length"), ctx)?;
    Ok(length.as_number().map(|n| n.max(0.0) as usize).unwrap_or(0))
}

fn number_to_value(n: f64) -> Value {
    if !n.is_finite() {
        Value::Null
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}
