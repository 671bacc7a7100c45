use ferrogate_core::Envelope;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::error::CliError;

pub fn render(
    envelope: &Envelope<Value>,
    format: OutputFormat,
    pretty: bool,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(envelope)?
            } else {
                serde_json::to_string(envelope)?
            };
            println!("{payload}");
        }
        OutputFormat::Table => render_table(envelope)?,
    }

    Ok(())
}

fn render_table(envelope: &Envelope<Value>) -> Result<(), CliError> {
    println!("request_id  : {}", envelope.meta.request_id);
    println!("schema      : {}", envelope.meta.schema_version);
    println!("generated_at: {}", envelope.meta.generated_at);
    if !envelope.meta.providers.is_empty() {
        println!(
            "providers   : {}",
            envelope
                .meta
                .providers
                .iter()
                .map(|provider| provider.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
    }
    println!("latency_ms  : {}", envelope.meta.latency_ms);

    if !envelope.meta.warnings.is_empty() {
        println!("warnings:");
        for warning in &envelope.meta.warnings {
            println!("  - {warning}");
        }
    }

    println!("data:");
    match &envelope.data {
        Value::Array(rows) if rows.iter().all(Value::is_object) && !rows.is_empty() => {
            render_rows(rows);
        }
        data => {
            let pretty_data = serde_json::to_string_pretty(data)?;
            for line in pretty_data.lines() {
                println!("  {line}");
            }
        }
    }

    if !envelope.errors.is_empty() {
        println!("errors:");
        for error in &envelope.errors {
            println!("  - {}: {}", error.code, error.message);
        }
    }

    Ok(())
}

/// Aligned columns keyed by the first row's fields.
fn render_rows(rows: &[Value]) {
    let Some(Value::Object(first)) = rows.first() else {
        return;
    };
    let columns: Vec<&String> = first.keys().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| cell_text(row.get(column.as_str())))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            cells
                .iter()
                .map(|row| row[index].chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header = columns
        .iter()
        .zip(&widths)
        .map(|(column, &width)| format!("{column:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    println!("  {}", header.trim_end());
    for row in &cells {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("  {}", line.trim_end());
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::from("-"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cells_render_null_as_dash_and_strings_unquoted() {
        assert_eq!(cell_text(None), "-");
        assert_eq!(cell_text(Some(&Value::Null)), "-");
        assert_eq!(cell_text(Some(&json!("open"))), "open");
        assert_eq!(cell_text(Some(&json!(3))), "3");
    }
}
