//! JSON Pointer navigation for secondary index maintenance (spec §4.2).
//!
//! `Value` equality is `serde_json::Value`'s own `PartialEq`: its `Map` is
//! compared by content, not insertion position, which already satisfies
//! the "structural, order-insensitive on objects" requirement in spec §3.

use crate::error::{CResult, Error};
use serde_json::Value;

/// Splits a JSON Pointer into its unescaped tokens. `""` yields no tokens
/// (meaning "the whole value"). Anything not starting with `/` (and not
/// itself empty) is a syntactically invalid pointer.
pub fn pointer_tokens(pointer: &str) -> CResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(Error::InvalidPointer(pointer.to_string()));
    }
    Ok(pointer[1..]
        .split('/')
        .map(|tok| tok.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Navigates `value` by the already-validated pointer tokens. Returns
/// `Ok(None)` when the target doesn't exist in this particular row --
/// that's a per-row miss, not a pointer error.
pub fn deref<'a>(value: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    let mut cur = value;
    for tok in tokens {
        cur = match cur {
            Value::Object(map) => map.get(tok)?,
            Value::Array(arr) => {
                let idx: usize = tok.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

/// Produces the set of index entries a row contributes for a given
/// pointer, per spec §4.2: a string target yields one entry, a
/// string-array target yields one entry per element (duplicates within
/// the same value collapsed, first occurrence wins), anything else
/// (missing, non-string, non-string-array) yields none.
pub fn secondary_values(target: Option<&Value>) -> Vec<String> {
    match target {
        None => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => {
            let mut seen = std::collections::HashSet::new();
            let mut out = Vec::new();
            for item in items {
                if let Value::String(s) = item {
                    if seen.insert(s.clone()) {
                        out.push(s.clone());
                    }
                } else {
                    // A non-string element disqualifies the whole array target.
                    return Vec::new();
                }
            }
            out
        }
        Some(_) => Vec::new(),
    }
}

/// Evaluates pointer `pointer` against `value`, returning the secondary
/// index values the row contributes (possibly empty). Returns an error
/// only if `pointer` is syntactically invalid.
pub fn index_values_for_row(value: &Value, pointer: &str) -> CResult<Vec<String>> {
    let tokens = pointer_tokens(pointer)?;
    Ok(secondary_values(deref(value, &tokens)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_value_pointer() {
        assert_eq!(pointer_tokens("").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn invalid_pointer_syntax() {
        assert!(matches!(pointer_tokens("a/b"), Err(Error::InvalidPointer(_))));
    }

    #[test]
    fn string_target() {
        let v = json!({"a": "3"});
        assert_eq!(index_values_for_row(&v, "/a").unwrap(), vec!["3".to_string()]);
    }

    #[test]
    fn string_array_target_dedups_first_wins() {
        let v = json!({"a": ["1", "2", "1"]});
        assert_eq!(
            index_values_for_row(&v, "/a").unwrap(),
            vec!["1".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn empty_array_yields_nothing() {
        let v = json!({"a": []});
        assert!(index_values_for_row(&v, "/a").unwrap().is_empty());
    }

    #[test]
    fn missing_target_yields_nothing() {
        let v = json!({"b": "3"});
        assert!(index_values_for_row(&v, "/a").unwrap().is_empty());
    }

    #[test]
    fn mixed_array_disqualifies() {
        let v = json!({"a": ["1", 2]});
        assert!(index_values_for_row(&v, "/a").unwrap().is_empty());
    }
}
