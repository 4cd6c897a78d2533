//! External functions every script can call, tried after the host's.

use crate::host::CallContext;
use crate::value::Value;

pub(crate) fn call(call: &mut CallContext<'_, '_>, name: &str) -> anyhow::Result<bool> {
    match name {
        "Sleep" => {
            let args = call.args(1)?;
            let ms = u32::try_from(args[0].get_int()).unwrap_or(0);
            call.sleep(ms);
            call.push_return(Value::Null);
        }
        "WaitFor" | "WaitForExclusive" => {
            let args = call.args(1)?;
            match args[0].native_handle() {
                Some(handle) if name == "WaitFor" => call.wait_for(handle),
                Some(handle) => call.wait_for_exclusive(handle),
                None => call.runtime_error(format!("{name}: argument is not an object.")),
            }
            call.push_return(Value::Null);
        }
        "SetScriptTimeSlice" => {
            let args = call.args(1)?;
            call.set_time_slice(u32::try_from(args[0].get_int()).unwrap_or(0));
            call.push_return(Value::Null);
        }
        "ToString" => {
            let args = call.args(1)?;
            call.push_return(Value::String(args[0].get_string()));
        }
        "ToInt" => {
            let args = call.args(1)?;
            call.push_return(Value::Int(args[0].get_int()));
        }
        "ToFloat" => {
            let args = call.args(1)?;
            call.push_return(Value::Float(args[0].get_float()));
        }
        "ToBool" => {
            let args = call.args(1)?;
            call.push_return(Value::Bool(args[0].get_bool()));
        }
        _ => return Ok(false),
    }
    Ok(true)
}
