//! Placeholder substitution for destination command templates
//!
//! Plugins keep destination-specific strings (topic names, keys, SQL fragments) with
//! `{$Identifier}` placeholders and render them per event row:
//!
//! - `{$TableName}`, `{$SchemaName}` and `{$EventType}` come from the event itself
//! - any other identifier is looked up as a column of `rows[row_index]`
//!
//! Anything that cannot be resolved renders as `nil`. Rendering never fails.

use super::PluginDataType;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Lexical form of a placeholder
pub const PLACEHOLDER_PATTERN: &str = r"\{\$([a-zA-Z0-9\-_]+)\}";

const NIL: &str = "nil";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid"));

/// Render `template` against `data`, using `rows[row_index]` for column placeholders.
///
/// Event-level placeholders resolve even when `row_index` is out of range.
pub fn transfer_result(template: &str, data: &PluginDataType, row_index: isize) -> String {
    let row = usize::try_from(row_index)
        .ok()
        .and_then(|index| data.rows.get(index));

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            match &caps[1] {
                "TableName" => Cow::<str>::Borrowed(data.table_name.as_str()),
                "SchemaName" => Cow::Borrowed(data.schema_name.as_str()),
                "EventType" => Cow::Borrowed(data.event_type.as_str()),
                column => match row {
                    Some(row) => render_value(row.get(column)),
                    None => Cow::Borrowed(NIL),
                },
            }
        })
        .into_owned()
}

/// Names of every placeholder in `template`, in order of appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

fn render_value(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(NIL),
        Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
        Some(other) => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Row;
    use serde_json::json;

    fn event(rows: Vec<Row>) -> PluginDataType {
        PluginDataType {
            event_type: "insert".to_string(),
            schema_name: "s1".to_string(),
            table_name: "t1".to_string(),
            rows,
            ..Default::default()
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_event_fields() {
        let data = event(vec![]);
        for index in [-1, 0, 7] {
            assert_eq!(
                transfer_result("{$TableName}.{$SchemaName}_{$EventType}", &data, index),
                "t1.s1_insert"
            );
        }
    }

    #[test]
    fn test_row_column() {
        let data = event(vec![row(&[("col", json!("x"))])]);
        assert_eq!(transfer_result("{$col}", &data, 0), "x");
        assert_eq!(transfer_result("{$col}", &data, 5), "nil");
        assert_eq!(transfer_result("{$col}", &data, -1), "nil");
    }

    #[test]
    fn test_missing_column_is_nil() {
        let data = event(vec![row(&[("other", json!("x"))])]);
        assert_eq!(transfer_result("{$col}", &data, 0), "nil");
    }

    #[test]
    fn test_value_rendering() {
        let data = event(vec![row(&[
            ("id", json!(42)),
            ("price", json!(9.5)),
            ("flag", json!(true)),
            ("gone", Value::Null),
            ("tags", json!(["a", "b"])),
        ])]);
        assert_eq!(
            transfer_result("{$id}|{$price}|{$flag}|{$gone}|{$tags}", &data, 0),
            r#"42|9.5|true|nil|["a","b"]"#
        );
    }

    #[test]
    fn test_repeated_placeholders() {
        let data = event(vec![row(&[("id", json!(1))])]);
        assert_eq!(
            transfer_result("{$TableName}-{$id}-{$TableName}-{$id}", &data, 0),
            "t1-1-t1-1"
        );
    }

    #[test]
    fn test_selects_row_by_index() {
        let data = event(vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])]);
        assert_eq!(transfer_result("key_{$id}", &data, 1), "key_2");
    }

    #[test]
    fn test_no_placeholders_unchanged() {
        let data = event(vec![row(&[("id", json!(1))])]);
        for s in ["", "plain text", "{$}", "{TableName}", "$TableName", "{$bad name}"] {
            assert_eq!(transfer_result(s, &data, 0), s);
        }
    }

    #[test]
    fn test_identifier_charset() {
        let data = event(vec![row(&[("user-id_2", json!("u"))])]);
        assert_eq!(transfer_result("{$user-id_2}", &data, 0), "u");
    }

    #[test]
    fn test_values_not_rescanned() {
        let data = event(vec![row(&[("a", json!("{$TableName}"))])]);
        assert_eq!(transfer_result("{$a}", &data, 0), "{$TableName}");
    }

    #[test]
    fn test_placeholders_listed() {
        assert_eq!(
            placeholders("{$SchemaName}.{$TableName}/{$id}"),
            vec!["SchemaName", "TableName", "id"]
        );
    }
}
