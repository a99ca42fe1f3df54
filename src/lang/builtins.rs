//! Builtin functions exposed to the score language.
//!
//! Everything here is recoverable except `error`: bad arguments warn and
//! yield a safe value so the score keeps running.

use std::io::Write;
use std::rc::Rc;

use tracing::warn;

use super::interp::{Eval, Interpreter};
use super::value::{format_g, MapKey, Value};
use crate::options::PrintLevel;

/// Dispatch a builtin by name. `None` means the name is not a builtin and
/// the caller should fall through to the host.
pub(super) fn call_builtin(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: &[Value],
) -> Option<Eval<Value>> {
    let result = match name {
        "print" => builtin_print(interp, args),
        "printf" => builtin_printf(interp, args),
        "error" => builtin_error(interp, args),
        "len" => Ok(builtin_len(args)),
        "interp" => Ok(builtin_interp(args)),
        "index" => Ok(builtin_index(args)),
        "contains" => Ok(builtin_contains(args)),
        "type" => Ok(builtin_type(args)),
        "tostring" => Ok(builtin_tostring(args)),
        "substring" => Ok(builtin_substring(args)),
        _ => return None,
    };
    Some(result)
}

/// Write one value in `print` style.
pub(super) fn write_value(out: &mut dyn Write, value: &Value, list_limit: usize) {
    match value {
        Value::Void => {
            let _ = write!(out, "(void)");
        }
        Value::Float(v) => {
            let _ = write!(out, "{}", format_g(*v, 12));
        }
        Value::String(s) => {
            let _ = write!(out, "\"{s}\"");
        }
        Value::Handle(h) => {
            let _ = write!(out, "{h:?}");
        }
        Value::Function(f) => {
            let _ = write!(out, "Function:{:p}", Rc::as_ptr(f));
        }
        Value::List(list) => {
            let list = list.borrow();
            let _ = write!(out, "[");
            if list.len() > list_limit {
                write_value_list(out, &list[..list_limit], list_limit);
                let _ = write!(out, ", ...]");
            } else {
                write_value_list(out, &list, list_limit);
                let _ = write!(out, "]");
            }
        }
        Value::Map(map) => {
            let map = map.borrow();
            let _ = write!(out, "[");
            for (i, (key, val)) in map.iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                let _ = write!(out, "key:");
                write_value(out, &key.0, list_limit);
                let _ = write!(out, " val:");
                write_value(out, val, list_limit);
            }
            let _ = write!(out, "]");
        }
        Value::Struct(instance) => {
            let _ = write!(out, "{{ ");
            for (i, member) in instance.members().iter().enumerate() {
                if i > 0 {
                    let _ = write!(out, ", ");
                }
                write_value(out, member.borrow().value(), list_limit);
            }
            let _ = write!(out, " }}");
        }
    }
}

/// Write values comma-separated in `print` style.
pub(super) fn write_value_list(out: &mut dyn Write, values: &[Value], list_limit: usize) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            let _ = write!(out, ", ");
        }
        write_value(out, value, list_limit);
    }
}

fn builtin_print(interp: &mut Interpreter<'_>, args: &[Value]) -> Eval<Value> {
    if interp.print_level < PrintLevel::Prints {
        return Ok(Value::Float(0.0));
    }
    let limit = interp.print_list_limit;
    write_value_list(&mut *interp.out, args, limit);
    let _ = writeln!(interp.out);
    Ok(Value::Float(0.0))
}

/// A primitive `printf` supporting score-language conversions:
/// `%d` (float as integer), `%f` (float), `%l` (list), `%s` (string),
/// `%t` (type name), `%z` (type-appropriate), with `\n \t \' \"` escapes.
fn builtin_printf(interp: &mut Interpreter<'_>, args: &[Value]) -> Eval<Value> {
    if interp.print_level < PrintLevel::Prints {
        return Ok(Value::Float(0.0));
    }
    let Some(Value::String(fmt)) = args.first() else {
        warn!("printf: first argument must be format string");
        return Ok(Value::Float(-1.0));
    };
    let limit = interp.print_list_limit;
    let mut next_arg = 1;
    let mut chars = fmt.chars();
    let failed = loop {
        let Some(c) = chars.next() else { break false };
        match c {
            '%' => {
                if next_arg >= args.len() {
                    warn!("printf: not enough arguments for format string");
                    break true;
                }
                let arg = &args[next_arg];
                match chars.next() {
                    Some('d') => match arg.as_float() {
                        Some(v) => {
                            let _ = write!(interp.out, "{}", v as i64);
                        }
                        None => {
                            warn!("printf: wrong argument type for format");
                            break true;
                        }
                    },
                    Some('f') => match arg.as_float() {
                        Some(v) => {
                            let _ = write!(interp.out, "{}", format_g(v, 12));
                        }
                        None => {
                            warn!("printf: wrong argument type for format");
                            break true;
                        }
                    },
                    Some('l') => match arg {
                        // The whole list is written; only nested lists
                        // inside it honor the print limit.
                        Value::List(list) => {
                            let list = list.borrow();
                            let _ = write!(interp.out, "[");
                            write_value_list(&mut *interp.out, &list, limit);
                            let _ = write!(interp.out, "]");
                        }
                        _ => {
                            warn!("printf: wrong argument type for format");
                            break true;
                        }
                    },
                    Some('s') => match arg.as_str() {
                        Some(s) => {
                            let _ = write!(interp.out, "{s}");
                        }
                        None => {
                            warn!("printf: wrong argument type for format");
                            break true;
                        }
                    },
                    Some('t') => {
                        let _ = write!(interp.out, "{}", arg.type_name());
                    }
                    Some('z') => write_value(&mut *interp.out, arg, limit),
                    Some(_) => {
                        warn!("printf: invalid format specifier");
                        break true;
                    }
                    None => {
                        warn!("printf: premature end of format string");
                        break true;
                    }
                }
                next_arg += 1;
            }
            '\\' => match chars.next() {
                Some('n') => {
                    let _ = writeln!(interp.out);
                }
                Some('t') => {
                    let _ = write!(interp.out, "\t");
                }
                Some('\'') => {
                    let _ = write!(interp.out, "'");
                }
                Some('"') => {
                    let _ = write!(interp.out, "\"");
                }
                Some(_) => {
                    warn!("printf: invalid escape character");
                    break true;
                }
                None => {
                    warn!("printf: premature end of format string");
                    break true;
                }
            },
            other => {
                let _ = write!(interp.out, "{other}");
            }
        }
    };
    if failed {
        let _ = writeln!(interp.out);
        return Ok(Value::Float(-1.0));
    }
    Ok(Value::Float(0.0))
}

fn builtin_error(interp: &mut Interpreter<'_>, args: &[Value]) -> Eval<Value> {
    let message = match args.first() {
        Some(Value::String(s)) => s.to_string(),
        _ => "error".to_string(),
    };
    Err(interp.fatal(message))
}

fn builtin_len(args: &[Value]) -> Value {
    if args.len() != 1 {
        warn!("len: must have one argument");
        return Value::Float(0.0);
    }
    let len = match &args[0] {
        Value::Float(_) | Value::Handle(_) => 1,
        Value::String(s) => s.len(),
        Value::List(l) => l.borrow().len(),
        Value::Map(m) => m.borrow().len(),
        Value::Struct(_) => {
            warn!("len: cannot ask for length of a struct");
            0
        }
        _ => {
            warn!("len: invalid argument");
            0
        }
    };
    Value::Float(len as f64)
}

/// Interpolated read from a float list at a fractional position in [0, 1].
fn builtin_interp(args: &[Value]) -> Value {
    if args.len() != 2 {
        warn!("interp: must have two arguments (list, fraction)");
        return Value::Float(-1.0);
    }
    let Some(list) = args[0].as_list() else {
        warn!("interp: first argument must be a list");
        return Value::Float(-1.0);
    };
    let Some(fraction) = args[1].as_float() else {
        warn!("interp: second argument must be a number");
        return Value::Float(-1.0);
    };
    let list = list.borrow();
    if list.is_empty() {
        return Value::Float(0.0);
    }
    if list.len() == 1 {
        return match list[0].as_float() {
            Some(v) => Value::Float(v),
            None => {
                warn!("interp: list elements to interpolate must both be floats");
                Value::Float(-1.0)
            }
        };
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let low = ((list.len() - 1) as f64 * fraction) as usize;
    let high = (low + 1).min(list.len() - 1);
    match (list[low].as_float(), list[high].as_float()) {
        (Some(a), Some(b)) => Value::Float(a + fraction * (b - a)),
        _ => {
            warn!("interp: list elements to interpolate must both be floats");
            Value::Float(-1.0)
        }
    }
}

/// Index of an item within a list, or -1. Floats and strings match by
/// value; lists and handles match by identity.
fn builtin_index(args: &[Value]) -> Value {
    if args.len() != 2 {
        warn!("index: must have two arguments (list, item_to_find)");
        return Value::Float(-1.0);
    }
    let Some(list) = args[0].as_list() else {
        warn!("index: first argument must be a list");
        return Value::Float(-1.0);
    };
    let needle = &args[1];
    let found = list.borrow().iter().position(|item| {
        if item.data_type() != needle.data_type() {
            return false;
        }
        match (item, needle) {
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Handle(a), Value::Handle(b)) => a.ptr_eq(b),
            _ => false,
        }
    });
    Value::Float(found.map(|i| i as f64).unwrap_or(-1.0))
}

fn builtin_contains(args: &[Value]) -> Value {
    if args.len() != 2 {
        warn!("contains: must have two arguments (container, item_to_find)");
        return Value::Float(0.0);
    }
    match &args[0] {
        Value::List(_) => {
            let truth = builtin_index(args).as_float() != Some(-1.0);
            Value::Float(if truth { 1.0 } else { 0.0 })
        }
        Value::Map(map) => {
            let truth = map.borrow().contains_key(&MapKey(args[1].clone()));
            Value::Float(if truth { 1.0 } else { 0.0 })
        }
        Value::String(haystack) => match args[1].as_str() {
            Some(needle) => {
                let truth = haystack.contains(needle);
                Value::Float(if truth { 1.0 } else { 0.0 })
            }
            None => {
                warn!("contains: second argument must be a string if examining a string");
                Value::Float(0.0)
            }
        },
        _ => {
            warn!("contains: first argument must be a string, list, or map");
            Value::Float(0.0)
        }
    }
}

fn builtin_type(args: &[Value]) -> Value {
    if args.len() != 1 {
        warn!("type: must have one argument");
        return Value::Void;
    }
    Value::string(args[0].type_name())
}

/// Canonical float-to-string conversion. The output parses back to the
/// same float.
fn builtin_tostring(args: &[Value]) -> Value {
    if args.len() != 1 {
        warn!("tostring: must have one argument");
        return Value::Void;
    }
    match args[0].as_float() {
        Some(v) => Value::string(&v.to_string()),
        None => {
            warn!("tostring: argument must be float type");
            Value::Void
        }
    }
}

/// `substring(s, start, end)` is the half-open byte range `s[start..end]`.
fn builtin_substring(args: &[Value]) -> Value {
    if args.len() != 3 {
        warn!("substring: must have three arguments (string, start_index, end_index)");
        return Value::Void;
    }
    let Some(s) = args[0].as_str() else {
        warn!("substring: first argument must be a string");
        return Value::Void;
    };
    let (Some(start), Some(end)) = (args[1].as_float(), args[2].as_float()) else {
        warn!("substring: second and third arguments must be floats");
        return Value::Void;
    };
    let (start, mut end) = (start as i64, end as i64);
    if start < 0 || end < start {
        warn!("substring: illegal indices");
        return Value::string("");
    }
    if end > s.len() as i64 {
        warn!("substring: end index out of range - using string endpoint");
        end = s.len() as i64;
    }
    let start = (start as usize).min(s.len());
    let end = end as usize;
    match s.get(start..end) {
        Some(sub) => Value::string(sub),
        None => {
            warn!("substring: index is not on a character boundary");
            Value::string("")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len() {
        assert_eq!(builtin_len(&[Value::string("hello")]).as_float(), Some(5.0));
        assert_eq!(builtin_len(&[Value::Float(3.0)]).as_float(), Some(1.0));
        let list = Value::new_list(vec![Value::Float(1.0), Value::Float(2.0)]);
        assert_eq!(builtin_len(&[list]).as_float(), Some(2.0));
        assert_eq!(builtin_len(&[]).as_float(), Some(0.0));
    }

    #[test]
    fn test_len_is_byte_count() {
        // Multibyte characters count by UTF-8 code units.
        assert_eq!(builtin_len(&[Value::string("é")]).as_float(), Some(2.0));
    }

    #[test]
    fn test_interp_endpoints() {
        let list = Value::new_list(vec![
            Value::Float(10.0),
            Value::Float(20.0),
            Value::Float(40.0),
        ]);
        assert_eq!(builtin_interp(&[list.clone(), Value::Float(0.0)]).as_float(), Some(10.0));
        assert_eq!(builtin_interp(&[list.clone(), Value::Float(1.0)]).as_float(), Some(40.0));
        // Fraction clamps.
        assert_eq!(builtin_interp(&[list.clone(), Value::Float(2.0)]).as_float(), Some(40.0));
        assert_eq!(builtin_interp(&[list, Value::Float(-1.0)]).as_float(), Some(10.0));
    }

    #[test]
    fn test_interp_interpolates() {
        let list = Value::new_list(vec![Value::Float(0.0), Value::Float(10.0)]);
        let v = builtin_interp(&[list, Value::Float(0.5)]).as_float().unwrap();
        assert!((v - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_interp_rejects_mixed_list() {
        let list = Value::new_list(vec![Value::Float(0.0), Value::string("x")]);
        assert_eq!(builtin_interp(&[list, Value::Float(0.9)]).as_float(), Some(-1.0));
    }

    #[test]
    fn test_index() {
        let list = Value::new_list(vec![
            Value::Float(1.0),
            Value::Float(2.0),
            Value::string("three"),
            Value::Float(4.0),
        ]);
        assert_eq!(builtin_index(&[list.clone(), Value::Float(2.0)]).as_float(), Some(1.0));
        assert_eq!(builtin_index(&[list.clone(), Value::string("three")]).as_float(), Some(2.0));
        assert_eq!(builtin_index(&[list.clone(), Value::Float(9.0)]).as_float(), Some(-1.0));
        // Type-matched: the string "2" does not match the float 2.
        assert_eq!(builtin_index(&[list, Value::string("2")]).as_float(), Some(-1.0));
    }

    #[test]
    fn test_index_returns_first_occurrence() {
        let list = Value::new_list(vec![
            Value::Float(5.0),
            Value::Float(3.0),
            Value::Float(5.0),
        ]);
        assert_eq!(builtin_index(&[list, Value::Float(5.0)]).as_float(), Some(0.0));
    }

    #[test]
    fn test_index_lists_compare_by_identity() {
        let inner = Value::new_list(vec![Value::Float(1.0)]);
        let look_alike = Value::new_list(vec![Value::Float(1.0)]);
        let outer = Value::new_list(vec![inner.clone()]);
        assert_eq!(builtin_index(&[outer.clone(), inner]).as_float(), Some(0.0));
        assert_eq!(builtin_index(&[outer, look_alike]).as_float(), Some(-1.0));
    }

    #[test]
    fn test_contains() {
        let list = Value::new_list(vec![Value::Float(1.0), Value::string("x")]);
        assert_eq!(builtin_contains(&[list.clone(), Value::string("x")]).as_float(), Some(1.0));
        assert_eq!(builtin_contains(&[list, Value::Float(7.0)]).as_float(), Some(0.0));

        let map = Value::new_map();
        if let Value::Map(m) = &map {
            m.borrow_mut().insert(MapKey(Value::string("k")), Value::Float(1.0));
        }
        assert_eq!(builtin_contains(&[map.clone(), Value::string("k")]).as_float(), Some(1.0));
        assert_eq!(builtin_contains(&[map, Value::string("nope")]).as_float(), Some(0.0));

        assert_eq!(
            builtin_contains(&[Value::string("hello"), Value::string("ell")]).as_float(),
            Some(1.0)
        );
        assert_eq!(
            builtin_contains(&[Value::string("hello"), Value::string("xyz")]).as_float(),
            Some(0.0)
        );
    }

    #[test]
    fn test_type_names() {
        assert_eq!(builtin_type(&[Value::Float(0.0)]).as_str(), Some("float"));
        assert_eq!(builtin_type(&[Value::string("")]).as_str(), Some("string"));
        assert_eq!(builtin_type(&[Value::new_map()]).as_str(), Some("map"));
        assert_eq!(builtin_type(&[Value::Void]).as_str(), Some("void"));
    }

    #[test]
    fn test_tostring_round_trips() {
        for v in [0.1, -3.75, 1e-20, 12345678.9, f64::MAX] {
            let s = builtin_tostring(&[Value::Float(v)]);
            let parsed: f64 = s.as_str().unwrap().parse().unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn test_substring() {
        let s = Value::string("hello world");
        let sub = builtin_substring(&[s.clone(), Value::Float(0.0), Value::Float(5.0)]);
        assert_eq!(sub.as_str(), Some("hello"));
        let sub = builtin_substring(&[s.clone(), Value::Float(6.0), Value::Float(99.0)]);
        assert_eq!(sub.as_str(), Some("world"));
        // Reversed and negative ranges are rejected.
        let sub = builtin_substring(&[s.clone(), Value::Float(4.0), Value::Float(2.0)]);
        assert_eq!(sub.as_str(), Some(""));
        let sub = builtin_substring(&[s, Value::Float(-1.0), Value::Float(2.0)]);
        assert_eq!(sub.as_str(), Some(""));
    }

    #[test]
    fn test_substring_concatenation_identity() {
        let s = "concatenate";
        for i in 0..=s.len() {
            for j in i..=s.len() {
                let a = builtin_substring(&[
                    Value::string(s),
                    Value::Float(i as f64),
                    Value::Float(j as f64),
                ]);
                let b = builtin_substring(&[
                    Value::string(s),
                    Value::Float(j as f64),
                    Value::Float(s.len() as f64),
                ]);
                let whole = builtin_substring(&[
                    Value::string(s),
                    Value::Float(i as f64),
                    Value::Float(s.len() as f64),
                ]);
                let joined = format!("{}{}", a.as_str().unwrap(), b.as_str().unwrap());
                assert_eq!(joined, whole.as_str().unwrap());
            }
        }
    }

    #[test]
    fn test_write_value_formats() {
        let mut out = Vec::new();
        write_value(&mut out, &Value::Float(1.5), 16);
        write_value(&mut out, &Value::string("hi"), 16);
        assert_eq!(String::from_utf8(out).unwrap(), "1.5\"hi\"");

        let mut out = Vec::new();
        let list = Value::new_list(vec![Value::Float(1.0), Value::string("a")]);
        write_value(&mut out, &list, 16);
        assert_eq!(String::from_utf8(out).unwrap(), "[1, \"a\"]");
    }

    #[test]
    fn test_list_print_truncation() {
        let items: Vec<Value> = (0..6).map(|i| Value::Float(i as f64)).collect();
        let list = Value::new_list(items);
        let mut out = Vec::new();
        write_value(&mut out, &list, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "[0, 1, 2, ...]");
    }
}
