//! The standard modules obfuscated programs import: `base64`, `zlib`,
//! `random`, `types` and `math`.

use super::{Args, namespace};
use crate::error::{InterpError, InterpResult};
use crate::eval::Interpreter;
use crate::value::Value;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use std::io::Read;

const MODULES: &[&str] = &["base64", "math", "random", "types", "zlib"];

/// `import name`: the top-level package `name` binds.
pub fn import_module(name: &str) -> InterpResult<Value> {
    let top = name.split('.').next().unwrap_or(name);
    if !MODULES.contains(&top) {
        return Err(InterpError::unsupported(format!("module {top}")));
    }
    Ok(Value::Module(top.to_string()))
}

/// `module.attr`
pub fn module_attr(module: &str, attr: &str) -> InterpResult<Value> {
    if !MODULES.contains(&module) {
        return Err(InterpError::unsupported(format!("module {module}")));
    }
    Ok(match (module, attr) {
        ("math", "pi") => Value::Float(std::f64::consts::PI),
        ("math", "e") => Value::Float(std::f64::consts::E),
        ("math", "inf") => Value::Float(f64::INFINITY),
        _ => Value::Builtin(format!("{module}.{attr}")),
    })
}

fn binary(value: &Value) -> InterpResult<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::Str(s) if s.is_ascii() => Ok(s.as_bytes().to_vec()),
        Value::Str(_) => Err(InterpError::value_error(
            "string argument should contain only ASCII characters",
        )),
        other => Err(InterpError::type_error(format!(
            "a bytes-like object is required, not '{}'",
            other.type_name()
        ))),
    }
}

fn zlib_error(e: &std::io::Error) -> InterpError {
    InterpError::Raised {
        kind: "zlib.error".into(),
        message: format!("Error -3 while decompressing data: {e}"),
        bases: super::exception_bases("Exception"),
    }
}

/// Call `module.member`.
///
/// `random` is deterministic here: every draw is the midpoint or first
/// choice, so programs that branch on a random value behave the same on
/// every run.
pub(super) fn call(
    interp: &mut Interpreter,
    module: &str,
    member: &str,
    mut args: Args<'_>,
) -> InterpResult<Value> {
    let float = |v: &Value| -> InterpResult<f64> {
        match v {
            Value::Float(f) => Ok(*f),
            other => Ok(other.as_int()? as f64),
        }
    };
    let value = match (module, member) {
        ("base64", "b64encode") => {
            args.arity(1, 1)?;
            Value::Bytes(STANDARD.encode(binary(&args.required(0)?)?).into_bytes())
        }
        ("base64", "b64decode") => {
            args.arity(1, 1)?;
            let text: Vec<u8> = binary(&args.required(0)?)?
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            let decoded = STANDARD.decode(text).map_err(|e| InterpError::Raised {
                kind: "binascii.Error".into(),
                message: e.to_string(),
                bases: std::iter::once("ValueError".to_string())
                    .chain(super::exception_bases("ValueError"))
                    .collect(),
            })?;
            Value::Bytes(decoded)
        }
        ("zlib", "compress") => {
            args.arity(1, 2)?;
            let level = args.take(1, "level").map_or(Ok(-1), |l| l.as_int())?;
            let level = match u32::try_from(level) {
                Ok(level) if level <= 9 => Compression::new(level),
                _ => Compression::default(),
            };
            let data = binary(&args.required(0)?)?;
            let mut out = Vec::new();
            ZlibEncoder::new(data.as_slice(), level)
                .read_to_end(&mut out)
                .map_err(|e| zlib_error(&e))?;
            Value::Bytes(out)
        }
        ("zlib", "decompress") => {
            args.arity(1, 1)?;
            let data = binary(&args.required(0)?)?;
            let mut out = Vec::new();
            ZlibDecoder::new(data.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| zlib_error(&e))?;
            Value::Bytes(out)
        }
        ("random", "random") => Value::Float(0.5),
        ("random", "betavariate") => {
            args.arity(2, 2)?;
            Value::Float(0.5)
        }
        ("random", "uniform") => {
            args.arity(2, 2)?;
            Value::Float((float(&args.required(0)?)? + float(&args.required(1)?)?) / 2.0)
        }
        ("random", "randint") => {
            args.arity(2, 2)?;
            let (low, high) = (args.required(0)?.as_int()?, args.required(1)?.as_int()?);
            if low > high {
                return Err(InterpError::value_error("empty range for randrange()"));
            }
            Value::Int(low)
        }
        ("random", "choice") => {
            args.arity(1, 1)?;
            interp
                .iterate(&args.required(0)?)?
                .into_iter()
                .next()
                .ok_or_else(|| InterpError::IndexError {
                    type_name: "Cannot choose from an empty sequence".into(),
                })?
        }
        ("random", "seed") => Value::None,
        ("types", "SimpleNamespace") => {
            args.arity(0, 0)?;
            return Ok(namespace(args.into_keywords()));
        }
        ("math", "sqrt") => {
            args.arity(1, 1)?;
            let v = float(&args.required(0)?)?;
            if v < 0.0 {
                return Err(InterpError::value_error("math domain error"));
            }
            Value::Float(v.sqrt())
        }
        ("math", "floor" | "ceil") => {
            args.arity(1, 1)?;
            match args.required(0)? {
                Value::Float(v) if v.is_finite() => {
                    let whole = if member == "floor" { v.floor() } else { v.ceil() };
                    Value::Int(whole as i128)
                }
                Value::Float(_) => {
                    return Err(InterpError::Overflow {
                        message: "cannot convert float infinity to integer".into(),
                    });
                }
                other => Value::Int(other.as_int()?),
            }
        }
        _ => return Err(InterpError::unsupported(format!("{module}.{member}()"))),
    };
    args.finish()?;
    Ok(value)
}
