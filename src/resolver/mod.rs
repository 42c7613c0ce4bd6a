//! Reference-path resolution and the fixed boolean expression grammar.
//!
//! Paths address the three value spaces a node sees: `$params.*`,
//! `$shared.*`, and `$input` / `$input.*`. Anything else is a literal
//! string. Expressions are JSON objects built from exactly the enumerated
//! operators: `and`/`or`/`not`, `eq`/`ne`/`gt`/`lt`/`ge`/`le`, `in`,
//! `contains`, and `exists`. Nothing else parses.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Walk `path` through nested mappings and lists with dot notation and a
/// single trailing `[N]` bracket per segment (`"a.b[2].c"`). Any miss
/// (absent key, out-of-range or malformed index, type mismatch) yields
/// `Null`, the absent sentinel.
pub fn get_by_path(v: &Value, path: &str) -> Value {
    if path.is_empty() {
        return v.clone();
    }
    let mut cur = v.clone();
    for seg in path.split('.') {
        if seg.is_empty() {
            continue;
        }
        let (name, idx) = parse_segment(seg);
        cur = match cur.as_object() {
            Some(m) => m.get(name).cloned().unwrap_or(Value::Null),
            None => return Value::Null,
        };
        if let Some(i) = idx {
            cur = match cur.as_array() {
                Some(arr) => arr.get(i).cloned().unwrap_or(Value::Null),
                None => return Value::Null,
            };
        }
        if cur.is_null() {
            return Value::Null;
        }
    }
    cur
}

/// Split `"items[0]"` into `("items", Some(0))`. A malformed bracket
/// (negative, non-numeric, unclosed) leaves the whole segment as the name,
/// which then misses as an ordinary key lookup.
fn parse_segment(seg: &str) -> (&str, Option<usize>) {
    let Some(open) = seg.find('[') else {
        return (seg, None);
    };
    let Some(close) = seg.rfind(']') else {
        return (seg, None);
    };
    if close <= open + 1 {
        return (seg, None);
    }
    match seg[open + 1..close].parse::<usize>() {
        Ok(n) => (&seg[..open], Some(n)),
        Err(_) => (seg, None),
    }
}

/// Resolve a reference path against the three value spaces. Paths without a
/// `$` prefix are returned unchanged as literal strings.
pub fn resolve_ref(
    path: &str,
    shared: &Map<String, Value>,
    params: &Map<String, Value>,
    input: &Value,
) -> Value {
    if let Some(rest) = path.strip_prefix("$params.") {
        return get_by_path(&Value::Object(params.clone()), rest.trim_start_matches('.'));
    }
    if let Some(rest) = path.strip_prefix("$shared.") {
        return get_by_path(&Value::Object(shared.clone()), rest.trim_start_matches('.'));
    }
    if let Some(rest) = path.strip_prefix("$input") {
        if rest.is_empty() {
            return input.clone();
        }
        return get_by_path(input, rest.trim_start_matches('.'));
    }
    Value::String(path.to_string())
}

/// Evaluate one node of the expression grammar. Unknown operators and
/// malformed operand shapes evaluate to `false`.
pub fn eval_expr(
    expr: &Value,
    shared: &Map<String, Value>,
    params: &Map<String, Value>,
    input: &Value,
) -> bool {
    let Some(obj) = expr.as_object() else {
        return false;
    };
    for (op, operand) in obj {
        match op.as_str() {
            "and" => {
                if let Some(arr) = operand.as_array() {
                    return arr.iter().all(|it| eval_expr(&as_expr(it), shared, params, input));
                }
            }
            "or" => {
                if let Some(arr) = operand.as_array() {
                    return arr.iter().any(|it| eval_expr(&as_expr(it), shared, params, input));
                }
            }
            "not" => {
                return !eval_expr(&as_expr(operand), shared, params, input);
            }
            "eq" | "ne" | "gt" | "lt" | "ge" | "le" => {
                if let Some([a, b]) = binary_operands(operand) {
                    let a = resolve_operand(a, shared, params, input);
                    let b = resolve_operand(b, shared, params, input);
                    return match op.as_str() {
                        "eq" => values_equal(&a, &b),
                        "ne" => !values_equal(&a, &b),
                        "gt" => compare(&a, &b) == Ordering::Greater,
                        "lt" => compare(&a, &b) == Ordering::Less,
                        "ge" => compare(&a, &b) != Ordering::Less,
                        _ => compare(&a, &b) != Ordering::Greater,
                    };
                }
            }
            "exists" => {
                if let Some(path) = operand.as_str() {
                    return !resolve_ref(path, shared, params, input).is_null();
                }
            }
            "in" => {
                if let Some([needle, collection]) = binary_operands(operand) {
                    let needle = resolve_operand(needle, shared, params, input);
                    let collection = resolve_operand(collection, shared, params, input);
                    return member_of(&collection, &needle);
                }
            }
            "contains" => {
                if let Some([collection, needle]) = binary_operands(operand) {
                    let collection = resolve_operand(collection, shared, params, input);
                    let needle = resolve_operand(needle, shared, params, input);
                    return member_of(&collection, &needle);
                }
            }
            _ => {}
        }
    }
    false
}

/// Shorthand operands inside `and`/`or`/`not` collapse to a truthiness
/// check against the literal.
fn as_expr(v: &Value) -> Value {
    if v.is_object() {
        v.clone()
    } else {
        serde_json::json!({ "eq": [v, true] })
    }
}

fn binary_operands(v: &Value) -> Option<[&Value; 2]> {
    let arr = v.as_array()?;
    if arr.len() == 2 {
        Some([&arr[0], &arr[1]])
    } else {
        None
    }
}

/// Operands that are strings resolve as reference paths (falling back to
/// the literal string); every other JSON value stands for itself.
fn resolve_operand(
    v: &Value,
    shared: &Map<String, Value>,
    params: &Map<String, Value>,
    input: &Value,
) -> Value {
    match v.as_str() {
        Some(s) => resolve_ref(s, shared, params, input),
        None => v.clone(),
    }
}

fn member_of(collection: &Value, needle: &Value) -> bool {
    match collection {
        Value::Array(items) => items.iter().any(|x| values_equal(x, needle)),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        _ => false,
    }
}

/// Numeric widening for comparisons: numbers directly, strings only via an
/// explicit parse.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion when both sides look numeric, canonical
/// string form otherwise.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(fa), Some(fb)) = (as_f64(a), as_f64(b)) {
        return fa == fb;
    }
    canonical(a) == canonical(b)
}

/// Three-way comparison with the same coercion rules as [`values_equal`].
pub fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(fa), Some(fb)) = (as_f64(a), as_f64(b)) {
        return fa.partial_cmp(&fb).unwrap_or(Ordering::Equal);
    }
    canonical(a).cmp(&canonical(b))
}

/// Canonical string form: strings verbatim, whole floats without the
/// trailing `.0`, everything else as compact JSON.
fn canonical(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.is_finite() && f == f.trunc() => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
