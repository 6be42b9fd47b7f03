//! Plain-text rendering of results and routes.

use std::fmt::Write;

use shardline_core::{GeneratedKey, LogicalResult, RoutedStatement, RowSet, SqlValue};

/// Render rows as an aligned text table.
///
/// ```text
/// +----------+---------+
/// | order_id | status  |
/// +----------+---------+
/// | 1        | NEW     |
/// +----------+---------+
/// ```
pub fn format_rows(rows: &RowSet) -> String {
    let cells: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();
    let widths: Vec<usize> = rows
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            cells
                .iter()
                .filter_map(|row| row.get(i).map(String::len))
                .chain(std::iter::once(column.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let border: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";
    let line = |values: &[String]| -> String {
        let mut out = String::new();
        for (value, width) in values.iter().zip(&widths) {
            let _ = write!(out, "| {value:<width$} ");
        }
        out + "|\n"
    };

    let mut out = border.clone();
    out += &line(&rows.columns);
    out += &border;
    for row in &cells {
        out += &line(row);
    }
    if !cells.is_empty() {
        out += &border;
    }
    let _ = writeln!(out, "({} row{})", cells.len(), if cells.len() == 1 { "" } else { "s" });
    out
}

fn cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Render a merged result.
pub fn format_result(result: &LogicalResult) -> String {
    match result {
        LogicalResult::Rows(rows) => format_rows(rows),
        LogicalResult::Affected {
            rows,
            generated_keys,
        } => {
            let mut out = format!("{rows} row(s) affected\n");
            if !generated_keys.is_empty() {
                let keys: Vec<String> = generated_keys.iter().map(cell).collect();
                let _ = writeln!(out, "generated keys: {}", keys.join(", "));
            }
            out
        }
    }
}

/// One line per routed statement, in `datasource ::: sql` form.
pub fn format_routes(routes: &[RoutedStatement]) -> String {
    routes.iter().map(|r| format!("{r}\n")).collect()
}

/// A Snowflake key with its decoded parts.
pub fn format_key(key: GeneratedKey) -> String {
    format!(
        "{:<20} timestamp={} worker={} sequence={}",
        key.value(),
        key.timestamp_millis(),
        key.worker_id(),
        key.sequence()
    )
}
