//! Rendering a merged result for stdout or a file.

use crate::config::OutputFormat;
use crate::merge::ResultMap;
use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;

/// Render `result` as JSON, or as CSV rows taken from the array under `key`.
pub fn render(
    result: &ResultMap,
    format: OutputFormat,
    pretty: bool,
    key: Option<&str>,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(result, pretty),
        OutputFormat::Csv => {
            let key = match key {
                Some(k) => k.to_string(),
                None => single_array_key(result)?,
            };
            let rows = result
                .get(&key)
                .with_context(|| format!("No '{}' key in result", key))?;
            to_csv(rows).with_context(|| format!("Rendering '{}' as CSV", key))
        }
    }
}

pub fn to_json(result: &ResultMap, pretty: bool) -> Result<String> {
    let out = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    Ok(out)
}

fn single_array_key(result: &ResultMap) -> Result<String> {
    let mut arrays = result
        .iter()
        .filter(|(_, v)| v.is_array())
        .map(|(k, _)| k.clone());
    match (arrays.next(), arrays.next()) {
        (Some(k), None) => Ok(k),
        (None, _) => bail!("CSV output needs an array of rows; result has none"),
        (Some(_), Some(_)) => bail!("Several arrays in result; pick one with --key"),
    }
}

fn cell(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => bail!("Nested value {} is not a CSV cell", value),
    })
}

/// Columns are the union of row keys in first-seen order.
pub fn to_csv(rows: &Value) -> Result<String> {
    let Some(rows) = rows.as_array() else {
        bail!("Expected an array of rows");
    };

    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        let Some(fields) = row.as_object() else {
            bail!("Row {} is not an object", row);
        };
        for k in fields.keys() {
            if !columns.contains(k) {
                columns.push(k.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&columns)?;
    for row in rows {
        let mut record = Vec::with_capacity(columns.len());
        for col in &columns {
            record.push(row.get(col).map(cell).transpose()?.unwrap_or_default());
        }
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow!("Flushing CSV writer: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ResultMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_json_compact_and_pretty() {
        let r = map(json!({"a": [1], "b": {"c": null}}));
        assert_eq!(to_json(&r, false).unwrap(), r#"{"a":[1],"b":{"c":null}}"#);
        assert!(to_json(&r, true).unwrap().contains("\n  \"a\""));
    }

    #[test]
    fn test_csv_union_of_columns() {
        let r = map(json!({
            "rows": [
                {"name": "Dangote, Cement", "price": 1.5},
                {"name": "MTN", "volume": 10, "price": null}
            ],
            "meta": "ignored"
        }));
        let out = render(&r, OutputFormat::Csv, true, None).unwrap();
        assert_eq!(
            out,
            "name,price,volume\n\"Dangote, Cement\",1.5,\nMTN,,10\n"
        );
    }

    #[test]
    fn test_csv_needs_one_array() {
        let r = map(json!({"a": [], "b": []}));
        assert!(render(&r, OutputFormat::Csv, true, None).is_err());
        assert!(render(&r, OutputFormat::Csv, true, Some("a")).is_ok());
        assert!(render(&r, OutputFormat::Csv, true, Some("z")).is_err());

        let nested = map(json!({"rows": [{"x": {"deep": 1}}]}));
        let err = render(&nested, OutputFormat::Csv, true, None).unwrap_err();
        assert!(format!("{:#}", err).contains("not a CSV cell"));
    }
}
