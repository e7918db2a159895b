//! JavaScript bindings for remex
//!
//! The native functions exposed to scripts, all on the global `remex` object.
//!
//! # JavaScript API
//!
//! - `remex.async(fn, cb)` - fire-and-forget wrapper (always installed)
//! - `remex.connect(addr)` - open a client, returns a callable proxy
//! - `remex.connectDict(addr)` - open a client, returns a dict handle
//! - `remex.close(proxy)` - close the client behind a proxy, returns 1 or 0
//! - `remex.serve(spec)` - start the server (`0` stops it), returns 1 or 0
//! - `remex.peer` - set while a pushed command is being dispatched
//!
//! The network primitives are only installed when the context belongs to a
//! host. Every proxy carries the id of its client in `__remexClient`, which is
//! how `remex.close` and `remex.connect(proxy)` find the connection.

use std::sync::Arc;

use boa_engine::{
    js_string,
    native_function::NativeFunction,
    object::{FunctionObjectBuilder, JsObject},
    property::Attribute,
    value::JsValue,
    Context, JsError, JsNativeError, JsResult, JsString,
};
use boa_gc::{Finalize, Trace};
use remex_client::{NetworkClient, Remote, RemoteDict, RemoteFunction};
use remex_common::{Address, RemexError};

use crate::host::Services;
use crate::runtime::{
    async_call::{make_async_wrapper, DeferredQueue},
    conversions::{js_to_value, value_to_js},
};

/// Property holding the id of the client a proxy talks through.
const CLIENT_TAG: &str = "__remexClient";

#[derive(Trace, Finalize)]
struct QueueCapture(#[unsafe_ignore_trace] DeferredQueue);

#[derive(Trace, Finalize)]
struct ServicesCapture(#[unsafe_ignore_trace] Arc<Services>);

#[derive(Trace, Finalize)]
struct ClientCapture(#[unsafe_ignore_trace] Arc<NetworkClient>);

#[derive(Trace, Finalize)]
struct FunctionCapture(#[unsafe_ignore_trace] RemoteFunction);

#[derive(Trace, Finalize)]
struct DictCapture(#[unsafe_ignore_trace] RemoteDict);

/// Installs the global `remex` object and returns it.
pub(crate) fn install_bindings(
    ctx: &mut Context,
    deferred: DeferredQueue,
    services: Option<Arc<Services>>,
) -> JsResult<JsObject> {
    let remex = JsObject::with_object_proto(ctx.intrinsics());

    let async_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, queue: &QueueCapture, context| {
                let func = callable_arg(args, 0, "async")?;
                let callback = callable_arg(args, 1, "async")?;
                Ok(make_async_wrapper(func, callback, queue.0.clone(), context)?.into())
            },
            QueueCapture(deferred),
        ),
    )
    .name(js_string!("async"))
    .length(2)
    .build();
    remex.set(js_string!("async"), async_fn, false, ctx)?;

    if let Some(services) = services {
        install_network_bindings(&remex, services, ctx)?;
    }

    ctx.register_global_property(js_string!("remex"), remex.clone(), Attribute::all())?;
    Ok(remex)
}

fn install_network_bindings(remex: &JsObject, services: Arc<Services>, ctx: &mut Context) -> JsResult<()> {
    let connect = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, services: &ServicesCapture, context| {
                let client = client_for(&arg(args, 0), &services.0, context)?;
                Ok(client_proxy(client, context)?.into())
            },
            ServicesCapture(Arc::clone(&services)),
        ),
    )
    .name(js_string!("connect"))
    .length(1)
    .build();
    remex.set(js_string!("connect"), connect, false, ctx)?;

    let connect_dict = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, services: &ServicesCapture, context| {
                let client = client_for(&arg(args, 0), &services.0, context)?;
                Ok(dict_handle(RemoteDict::new(client), context)?.into())
            },
            ServicesCapture(Arc::clone(&services)),
        ),
    )
    .name(js_string!("connectDict"))
    .length(1)
    .build();
    remex.set(js_string!("connectDict"), connect_dict, false, ctx)?;

    let close = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, services: &ServicesCapture, context| {
                let closed = match client_id(&arg(args, 0), context)? {
                    Some(id) => services.0.close_client(id),
                    None => false,
                };
                Ok(JsValue::new(i32::from(closed)))
            },
            ServicesCapture(Arc::clone(&services)),
        ),
    )
    .name(js_string!("close"))
    .length(1)
    .build();
    remex.set(js_string!("close"), close, false, ctx)?;

    let serve = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, services: &ServicesCapture, _context| {
                let address = address_arg(&arg(args, 0))?;
                let changed = if address.is_stop_request() {
                    services.0.stop_server()
                } else {
                    services.0.serve(&address).map_err(to_js_error)?.is_some()
                };
                Ok(JsValue::new(i32::from(changed)))
            },
            ServicesCapture(services),
        ),
    )
    .name(js_string!("serve"))
    .length(1)
    .build();
    remex.set(js_string!("serve"), serve, false, ctx)?;

    Ok(())
}

/// A callable standing in for a whole connection.
///
/// `proxy(x)`: a string is evaluated remotely, a symbol fetches a remote
/// value (functions come back as function proxies), `[Symbol(f), ...args]`
/// calls `f`, and anything else is evaluated as a literal.
pub(crate) fn client_proxy(client: Arc<NetworkClient>, ctx: &mut Context) -> JsResult<JsObject> {
    let id = client.id();
    let proxy: JsObject = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, client: &ClientCapture, context| {
                let value = js_to_value(&arg(args, 0), context)?;
                let remote = client.0.apply(value).map_err(to_js_error)?;
                remote_to_js(remote, context)
            },
            ClientCapture(client),
        ),
    )
    .name(js_string!("remote"))
    .length(1)
    .build()
    .into();
    tag_client(&proxy, id, ctx)?;
    Ok(proxy)
}

/// A function proxy. Missing arguments are sent as null and extra ones are
/// dropped, matching how a local call would see them.
fn function_proxy(function: RemoteFunction, ctx: &mut Context) -> JsResult<JsObject> {
    let id = function.client().id();
    let name = JsString::from(function.symbol());
    let arity = function.arity();
    let proxy: JsObject = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, function: &FunctionCapture, context| {
                let mut values = Vec::with_capacity(function.0.arity());
                for i in 0..function.0.arity() {
                    values.push(js_to_value(&arg(args, i), context)?);
                }
                let result = function.0.call(values).map_err(to_js_error)?;
                value_to_js(result, context)
            },
            FunctionCapture(function),
        ),
    )
    .name(name)
    .length(arity)
    .build()
    .into();
    tag_client(&proxy, id, ctx)?;
    Ok(proxy)
}

/// A plain object with `get`, `set`, `has`, `close` and `isOpen` methods.
fn dict_handle(dict: RemoteDict, ctx: &mut Context) -> JsResult<JsObject> {
    let id = dict.client().id();
    let handle = JsObject::with_object_proto(ctx.intrinsics());

    let get = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, dict: &DictCapture, context| {
                let key = js_to_value(&arg(args, 0), context)?;
                let remote = dict.0.get(key).map_err(to_js_error)?;
                remote_to_js(remote, context)
            },
            DictCapture(dict.clone()),
        ),
    )
    .name(js_string!("get"))
    .length(1)
    .build();
    handle.set(js_string!("get"), get, false, ctx)?;

    let set = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |this, args, dict: &DictCapture, context| {
                let key = js_to_value(&arg(args, 0), context)?;
                let value = js_to_value(&arg(args, 1), context)?;
                dict.0.set(key, value).map_err(to_js_error)?;
                Ok(this.clone())
            },
            DictCapture(dict.clone()),
        ),
    )
    .name(js_string!("set"))
    .length(2)
    .build();
    handle.set(js_string!("set"), set, false, ctx)?;

    let has = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, args, dict: &DictCapture, context| {
                let key = js_to_value(&arg(args, 0), context)?;
                match dict.0.contains(key) {
                    Ok(found) => Ok(JsValue::new(found)),
                    Err(e) => Err(JsNativeError::typ().with_message(e.to_string()).into()),
                }
            },
            DictCapture(dict.clone()),
        ),
    )
    .name(js_string!("has"))
    .length(1)
    .build();
    handle.set(js_string!("has"), has, false, ctx)?;

    let close = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, _args, dict: &DictCapture, _context| {
                Ok(JsValue::new(i32::from(dict.0.client().close())))
            },
            DictCapture(dict.clone()),
        ),
    )
    .name(js_string!("close"))
    .length(0)
    .build();
    handle.set(js_string!("close"), close, false, ctx)?;

    let is_open = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_this, _args, dict: &DictCapture, _context| Ok(JsValue::new(dict.0.client().is_open())),
            DictCapture(dict),
        ),
    )
    .name(js_string!("isOpen"))
    .length(0)
    .build();
    handle.set(js_string!("isOpen"), is_open, false, ctx)?;

    tag_client(&handle, id, ctx)?;
    Ok(handle)
}

fn remote_to_js(remote: Remote, ctx: &mut Context) -> JsResult<JsValue> {
    match remote {
        Remote::Value(value) => value_to_js(value, ctx),
        Remote::Function(function) => Ok(function_proxy(function, ctx)?.into()),
    }
}

/// The client a `connect` argument names: an existing proxy shares its
/// connection, anything else is parsed as an address.
fn client_for(target: &JsValue, services: &Services, ctx: &mut Context) -> JsResult<Arc<NetworkClient>> {
    if let Some(id) = client_id(target, ctx)? {
        return services.client(id).ok_or_else(|| {
            JsNativeError::typ()
                .with_message("the connection behind this proxy is closed")
                .into()
        });
    }
    let address = address_arg(target)?;
    let client = services.open_client(address);
    if !client.wait_connected(services.config().client.connect_wait) {
        tracing::warn!(client = client.id(), endpoint = %client.address(), "not connected yet");
    }
    Ok(client)
}

fn client_id(value: &JsValue, ctx: &mut Context) -> JsResult<Option<u64>> {
    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    let tag = JsString::from(CLIENT_TAG);
    if !object.has_own_property(tag.clone(), ctx)? {
        return Ok(None);
    }
    Ok(object.get(tag, ctx)?.as_number().map(|n| n as u64))
}

fn tag_client(object: &JsObject, id: u64, ctx: &mut Context) -> JsResult<()> {
    object.create_data_property_or_throw(JsString::from(CLIENT_TAG), JsValue::new(id as f64), ctx)?;
    Ok(())
}

/// Parses an address argument: a port number, `"port"` or `"host:port"`.
fn address_arg(value: &JsValue) -> JsResult<Address> {
    let address = if let Some(n) = value.as_number() {
        if n.fract() != 0.0 {
            return Err(JsNativeError::range()
                .with_message(format!("invalid port {}", n))
                .into());
        }
        Address::from_port_number(n as i64)
    } else if let Some(s) = value.as_string() {
        Address::parse(&s.to_std_string_escaped())
    } else {
        return Err(JsNativeError::typ()
            .with_message("address must be a port number or a \"host:port\" string")
            .into());
    };
    address.map_err(to_js_error)
}

fn callable_arg(args: &[JsValue], index: usize, function: &str) -> JsResult<JsObject> {
    args.get(index)
        .and_then(JsValue::as_object)
        .filter(|object| object.is_callable())
        .cloned()
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("{}: argument {} must be a function", function, index + 1))
                .into()
        })
}

fn arg(args: &[JsValue], index: usize) -> JsValue {
    args.get(index).cloned().unwrap_or_default()
}

fn to_js_error(err: RemexError) -> JsError {
    JsNativeError::error().with_message(err.to_string()).into()
}

