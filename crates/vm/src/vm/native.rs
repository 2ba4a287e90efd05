//! Built-in native functions.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{NativeFn, Value};

/// Natives every VM starts with: `(name, arity, function)`
pub(crate) const BUILTINS: &[(&str, u8, NativeFn)] = &[("clock", 0, clock)];

/// Seconds since the UNIX epoch.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock is before the epoch: {}", e))?;
    Ok(Value::Number(now.as_secs_f64()))
}
