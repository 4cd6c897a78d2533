//! `CALL_BY_EXP`: calls on objects go through an ordered resolver chain.

use crate::error::VmError;
use crate::host::{CallContext, Clock, ExecEnv, ScriptHost};
use crate::native::{same_handle, NativeHandle};
use crate::value::Value;

use super::Script;

pub(crate) enum Resolution {
    Handled,
    NotHandled,
    Failed(String),
}

struct MethodCall<'a, 'e> {
    script: &'a mut Script,
    env: &'a mut ExecEnv<'e>,
    clock: Clock,
    target: Option<NativeHandle>,
    name: &'a str,
    native_tried: bool,
}

type Resolver = fn(&mut MethodCall<'_, '_>) -> Result<Resolution, VmError>;

const RESOLVERS: [Resolver; 3] = [reentrant_native, bytecode_method, generic_native];

pub(crate) fn call_method(
    script: &mut Script,
    host: &mut dyn ScriptHost,
    env: &mut ExecEnv<'_>,
    target: Value,
    name: &str,
) -> Result<(), VmError> {
    let clock = Clock::read(host);
    let mut call = MethodCall {
        script,
        env,
        clock,
        target: target.native_handle(),
        name,
        native_tried: false,
    };

    for resolve in RESOLVERS {
        match resolve(&mut call)? {
            Resolution::Handled => return Ok(()),
            Resolution::NotHandled => continue,
            Resolution::Failed(message) => return call.script.failed_call(call.env, message),
        }
    }
    let message = format!("Call to undefined method '{name}'. Ignored.");
    call.script.failed_call(call.env, message)
}

fn invoke_native(call: &mut MethodCall<'_, '_>, handle: &NativeHandle) -> Result<Resolution, VmError> {
    call.native_tried = true;
    let Ok(mut object) = handle.try_borrow_mut() else {
        return Ok(Resolution::Failed(format!(
            "Object is busy, cannot call method '{}'.",
            call.name
        )));
    };
    let base = call.script.call_window_base();
    let result = {
        let mut ctx = CallContext::new(call.script, call.env, call.clock);
        object.call_method(&mut ctx, call.name)
    };
    drop(object);
    match result {
        Ok(true) => Ok(Resolution::Handled),
        Ok(false) => Ok(Resolution::NotHandled),
        Err(e) => {
            let name = call.name;
            call.script.abandon_call(call.env, base, e, |e| format!("Method '{name}' failed: {e:#}"))?;
            Ok(Resolution::Handled)
        }
    }
}

/// A method thread calling its own method on its owner reaches the native
/// implementation instead of spawning itself again.
fn reentrant_native(call: &mut MethodCall<'_, '_>) -> Result<Resolution, VmError> {
    let Some(handle) = call.target.clone() else {
        return Ok(Resolution::NotHandled);
    };
    let script = &*call.script;
    let own_method = script.is_method_thread()
        && script.thread_event().is_some_and(|m| m.eq_ignore_ascii_case(call.name))
        && script.owner().is_some_and(|owner| same_handle(owner, &handle));
    if !own_method {
        return Ok(Resolution::NotHandled);
    }
    invoke_native(call, &handle)
}

/// Runs a method defined in bytecode by one of the object's scripts in a new
/// thread; the caller waits for its result.
fn bytecode_method(call: &mut MethodCall<'_, '_>) -> Result<Resolution, VmError> {
    let Some(handle) = call.target.clone() else {
        return Ok(Resolution::NotHandled);
    };
    let attached = match handle.try_borrow() {
        Ok(object) => object.scripts(),
        Err(_) => return Ok(Resolution::NotHandled),
    };
    let Some(source) = attached
        .iter()
        .filter_map(|id| call.env.directory.get(id))
        .find(|entry| entry.image.method_pos(call.name).is_some())
        .cloned()
    else {
        return Ok(Resolution::NotHandled);
    };

    if call.script.is_unbreakable() {
        return Ok(Resolution::Failed(format!(
            "Cannot call method '{}'. Ignored.",
            call.name
        )));
    }

    let id = call.env.allocate_id();
    let Some(mut thread) = Script::create_method_thread(id, &source, call.name) else {
        return Ok(Resolution::NotHandled);
    };
    thread.copy_parameters(call.script.stack_mut())?;
    log::debug!(
        "{} calls method '{}' of '{}' in thread {}",
        call.script.id(),
        call.name,
        source.filename,
        id
    );
    call.script.wait_for_script(id);
    call.env.spawned.push(thread);
    Ok(Resolution::Handled)
}

fn generic_native(call: &mut MethodCall<'_, '_>) -> Result<Resolution, VmError> {
    match call.target.clone() {
        Some(handle) if !call.native_tried => invoke_native(call, &handle),
        _ => Ok(Resolution::NotHandled),
    }
}
