//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use crate::consumer::MirrorEvent;
use crate::model::ModelDescriptor;
use crate::registry::Catalog;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No models found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Model display
// ============================================================================

/// `name [quantization] @ url`
pub fn format_descriptor(model: &ModelDescriptor) -> String {
    if model.quantization.is_empty() {
        format!("{} @ {}", model.name, model.url)
    } else {
        format!("{} [{}] @ {}", model.name, model.quantization, model.url)
    }
}

/// Format a list of models as a table
pub fn format_models(models: &[ModelDescriptor]) -> String {
    let headers = &["NAME", "QUANT", "URL"];
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|m| {
            vec![
                m.name.clone(),
                if m.quantization.is_empty() {
                    "-".to_string()
                } else {
                    m.quantization.clone()
                },
                m.url.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format the registry catalog with a count line
pub fn format_catalog(catalog: &Catalog) -> String {
    format!(
        "Catalog: {} model(s) on {} backend(s)\n{}",
        catalog.len(),
        catalog.backends().len(),
        format_models(catalog.models())
    )
}

/// One line per mirror change
pub fn format_event(event: &MirrorEvent) -> String {
    match event {
        MirrorEvent::ServerAvailable(m) => format!("+ {}", format_descriptor(m)),
        MirrorEvent::ServerUnavailable(m) => format!("- {}", format_descriptor(m)),
    }
}
