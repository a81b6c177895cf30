use super::{deserialize, serialize, FieldCodec};
use crate::schema::Value;
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::sync::Arc;

type CodecResult<T> = std::result::Result<T, String>;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const LIST_SEPARATOR: &str = ", ";
const DICT_SEPARATOR: &str = "::";

fn unexpected(expected: &str, value: &Value) -> String {
    format!("expected {expected}, got {}", value.type_name())
}

/// Text codec. The multiline flavor escapes backslash, newline, carriage
/// return and tab so a value always stays on one physical line, and writes
/// leading and trailing spaces as `\s` so the document parser does not trim
/// them. Single line text is written as is.
#[derive(Debug, Clone, Copy)]
pub struct TextCodec {
    escape_controls: bool,
}

impl TextCodec {
    pub fn multiline() -> Self {
        TextCodec {
            escape_controls: true,
        }
    }

    pub fn line() -> Self {
        TextCodec {
            escape_controls: false,
        }
    }
}

impl FieldCodec for TextCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        let text = value.as_str().ok_or_else(|| unexpected("text", value))?;
        if !self.escape_controls {
            return Ok(Some(text.to_string()));
        }
        let inner_start = text.len() - text.trim_start_matches(' ').len();
        let inner_end = text.trim_end_matches(' ').len().max(inner_start);
        let mut out = String::with_capacity(text.len());
        for (idx, c) in text.char_indices() {
            match c {
                ' ' if idx < inner_start || idx >= inner_end => out.push_str("\\s"),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                other => out.push(other),
            }
        }
        Ok(Some(out))
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        if !self.escape_controls {
            return Ok(Value::Text(raw.to_string()));
        }
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('s') => out.push(' '),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        Ok(Value::Text(out))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntCodec;

impl FieldCodec for IntCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        match value {
            Value::Int(i) => Ok(Some(i.to_string())),
            other => Err(unexpected("int", other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        raw.trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| format!("invalid int {raw:?}: {e}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FloatCodec;

impl FieldCodec for FloatCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        match value {
            Value::Float(f) => Ok(Some(f.to_string())),
            Value::Int(i) => Ok(Some(i.to_string())),
            other => Err(unexpected("float", other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        raw.trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| format!("invalid float {raw:?}: {e}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoolCodec;

impl FieldCodec for BoolCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        match value {
            Value::Bool(true) => Ok(Some("True".into())),
            Value::Bool(false) => Ok(Some("False".into())),
            other => Err(unexpected("bool", other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("invalid bool {raw:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DateCodec;

impl FieldCodec for DateCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        match value {
            Value::Date(d) => Ok(Some(d.format(DATE_FORMAT).to_string())),
            other => Err(unexpected("date", other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map(Value::Date)
            .map_err(|e| format!("invalid date {raw:?}: {e}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DatetimeCodec;

impl FieldCodec for DatetimeCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        match value {
            Value::Datetime(dt) => Ok(Some(dt.format(DATETIME_FORMAT).to_string())),
            other => Err(unexpected("datetime", other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT)
            .map(Value::Datetime)
            .map_err(|e| format!("invalid datetime {raw:?}: {e}"))
    }
}

/// Items joined by `", "`. Each item is escaped on its own, so an unset
/// item shows up as `!!None` once the whole value is escaped again.
pub struct ListCodec {
    item: Arc<dyn FieldCodec>,
}

impl ListCodec {
    pub fn new(item: Arc<dyn FieldCodec>) -> Self {
        ListCodec { item }
    }
}

impl FieldCodec for ListCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        let items = match value {
            Value::List(items) => items,
            other => return Err(unexpected("list", other)),
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let encoded = serialize(self.item.as_ref(), item)?;
            parts.push(encoded.unwrap_or_else(|| super::NONE_MARKER.to_string()));
        }
        Ok(Some(parts.join(LIST_SEPARATOR)))
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        if raw.trim().is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        raw.split(LIST_SEPARATOR)
            .map(|part| deserialize(self.item.as_ref(), part.trim_matches(|c: char| c == '\n' || c == '\t')))
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::List)
    }
}

/// `key::value` entries, one per line.
pub struct DictCodec {
    value: Arc<dyn FieldCodec>,
}

impl DictCodec {
    pub fn new(value: Arc<dyn FieldCodec>) -> Self {
        DictCodec { value }
    }
}

impl FieldCodec for DictCodec {
    fn encode(&self, value: &Value) -> CodecResult<Option<String>> {
        let entries = match value {
            Value::Dict(entries) => entries,
            other => return Err(unexpected("dict", other)),
        };
        let mut lines = Vec::with_capacity(entries.len());
        for (key, item) in entries {
            let encoded = serialize(self.value.as_ref(), item)?
                .unwrap_or_else(|| super::NONE_MARKER.to_string());
            lines.push(format!("{key}{DICT_SEPARATOR}{encoded}"));
        }
        Ok(Some(lines.join("\n")))
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        let mut entries = IndexMap::new();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let parts: Vec<&str> = line.split(DICT_SEPARATOR).collect();
            if parts.len() != 2 {
                return Err(format!(
                    "dict entry {line:?} must contain exactly one {DICT_SEPARATOR:?}"
                ));
            }
            let item = deserialize(self.value.as_ref(), parts[1])?;
            entries.insert(parts[0].to_string(), item);
        }
        Ok(Value::Dict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::super::CodecRegistry;
    use super::*;
    use crate::schema::FieldType;

    fn codec(field_type: FieldType) -> Arc<dyn FieldCodec> {
        CodecRegistry::new().resolve(&field_type).unwrap()
    }

    fn dump(field_type: FieldType, value: Value) -> String {
        serialize(codec(field_type).as_ref(), &value).unwrap().unwrap()
    }

    fn load(field_type: FieldType, raw: &str) -> CodecResult<Value> {
        deserialize(codec(field_type).as_ref(), raw)
    }

    #[test]
    fn test_list_with_none_item() {
        let ty = FieldType::list(FieldType::Int);
        assert_eq!(dump(ty.clone(), Value::from(vec![Some(42i64), None])), "42, !!None");
        assert_eq!(
            load(ty.clone(), "42, !!None").unwrap(),
            Value::List(vec![Value::Int(42), Value::None])
        );
        assert_eq!(load(ty, "").unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_list_separator_inside_item_is_lost() {
        let ty = FieldType::list(FieldType::TextLine);
        let value = Value::List(vec![
            Value::from("42"),
            Value::None,
            Value::from(", "),
            Value::from("foo"),
        ]);
        let raw = dump(ty.clone(), value);
        assert_eq!(raw, "42, !!None, , , foo");
        assert_eq!(
            load(ty, &raw).unwrap(),
            Value::List(vec![
                Value::from("42"),
                Value::None,
                Value::from(""),
                Value::from(""),
                Value::from("foo"),
            ])
        );
    }

    #[test]
    fn test_dict_entries_and_none() {
        let ty = FieldType::dict(FieldType::Int);
        let mut map = IndexMap::new();
        map.insert("foo".to_string(), Value::Int(42));
        map.insert("bar".to_string(), Value::None);
        assert_eq!(dump(ty.clone(), Value::Dict(map)), "foo::42\nbar::!!None");

        assert_eq!(load(ty.clone(), "!None").unwrap(), Value::None);
        assert_eq!(load(ty.clone(), "").unwrap(), Value::Dict(IndexMap::new()));

        let loaded = load(ty, "bar::15\nfoo::!!None").unwrap();
        let mut expected = IndexMap::new();
        expected.insert("bar".to_string(), Value::Int(15));
        expected.insert("foo".to_string(), Value::None);
        assert_eq!(loaded, Value::Dict(expected));
    }

    #[test]
    fn test_dict_edge_cases() {
        let ty = FieldType::dict(FieldType::Int);
        assert!(load(ty.clone(), "{}").is_err());
        assert!(load(ty.clone(), "::").is_err());
        assert!(load(ty.clone(), "ba::r::42").is_err());

        let mut expected = IndexMap::new();
        expected.insert(String::new(), Value::Int(42));
        assert_eq!(load(ty.clone(), "::42").unwrap(), Value::Dict(expected));

        let mut expected = IndexMap::new();
        expected.insert("bar".to_string(), Value::Int(42));
        assert_eq!(load(ty, "\nbar::42").unwrap(), Value::Dict(expected));
    }

    #[test]
    fn test_dict_of_dates_rejects_non_dates() {
        let ty = FieldType::dict(FieldType::Date);
        let loaded = load(ty.clone(), "foo::2015-11-07\nbar::!!None").unwrap();
        let mut expected = IndexMap::new();
        expected.insert(
            "foo".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2015, 11, 7).unwrap()),
        );
        expected.insert("bar".to_string(), Value::None);
        assert_eq!(loaded, Value::Dict(expected));

        assert!(load(ty, "foo::42\nbar::!!None").is_err());
    }

    #[test]
    fn test_text_escapes_control_characters() {
        let ty = FieldType::dict(FieldType::Text);
        let mut map = IndexMap::new();
        map.insert("foo".to_string(), Value::from("first\nsecond\rthird\ta tab"));
        let raw = dump(ty.clone(), Value::Dict(map.clone()));
        assert_eq!(raw, "foo::first\\nsecond\\rthird\\ta tab");
        assert_eq!(load(ty, &raw).unwrap(), Value::Dict(map));
    }

    #[test]
    fn test_text_keeps_edge_spaces() {
        let raw = dump(FieldType::Text, Value::from("  padded  motto  "));
        assert_eq!(raw, "\\s\\spadded  motto\\s\\s");
        assert_eq!(load(FieldType::Text, &raw).unwrap(), Value::from("  padded  motto  "));

        assert_eq!(dump(FieldType::Text, Value::from("   ")), "\\s\\s\\s");
        assert_eq!(load(FieldType::Text, "\\s\\s\\s").unwrap(), Value::from("   "));

        // A literal backslash-s is not a space.
        let raw = dump(FieldType::Text, Value::from("a\\s"));
        assert_eq!(raw, "a\\\\s");
        assert_eq!(load(FieldType::Text, &raw).unwrap(), Value::from("a\\s"));
    }

    #[test]
    fn test_dict_of_lists() {
        let ty = FieldType::dict(FieldType::list(FieldType::TextLine));
        let mut map = IndexMap::new();
        map.insert("foo".to_string(), Value::from(vec!["first", "second"]));
        let raw = dump(ty.clone(), Value::Dict(map.clone()));
        assert_eq!(raw, "foo::first, second");
        assert_eq!(load(ty, &raw).unwrap(), Value::Dict(map));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(dump(FieldType::Bool, Value::Bool(true)), "True");
        assert_eq!(load(FieldType::Bool, "no").unwrap(), Value::Bool(false));
        assert!(load(FieldType::Bool, "maybe").is_err());

        assert_eq!(load(FieldType::Float, "2.5").unwrap(), Value::Float(2.5));
        assert!(load(FieldType::Int, "12a").is_err());

        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 45, 10)
            .unwrap();
        let raw = dump(FieldType::Datetime, Value::Datetime(dt));
        assert_eq!(load(FieldType::Datetime, &raw).unwrap(), Value::Datetime(dt));
        assert!(load(FieldType::Date, "2015-13-01").is_err());
    }
}
