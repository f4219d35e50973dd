use std::fmt::Write as _;

use sqlpad_core::confirmation::ConfirmationPrompt;
use sqlpad_core::notifications::{Notification, Severity};
use sqlpad_core::query_result::{QueryResult, ResultKind};
use sqlpad_core::tabs::{Tab, TabRegistry};

const MAX_CELL_WIDTH: usize = 40;

pub fn render_result(result: &QueryResult) -> String {
    let mut out = String::new();
    if !result.columns.is_empty() {
        out.push_str(&render_table(result));
    }

    match (result.kind, result.page_info()) {
        (ResultKind::Select, Some(page)) => {
            let _ = writeln!(
                out,
                "page {} of {}, {} row(s) total, {:.1} ms",
                page.page, page.total_pages, page.total_rows, result.execution_time_ms
            );
        }
        _ => {
            if let Some(message) = &result.message {
                let _ = writeln!(out, "{message} ({:.1} ms)", result.execution_time_ms);
            }
            for (index, statement) in result.results.iter().enumerate() {
                let summary = statement
                    .message
                    .clone()
                    .or_else(|| statement.query_type.clone())
                    .unwrap_or_default();
                let _ = writeln!(out, "  {}. {summary}", index + 1);
            }
        }
    }
    out
}

fn render_table(result: &QueryResult) -> String {
    let header = result
        .columns
        .iter()
        .map(|column| column.name.clone())
        .collect::<Vec<_>>();
    let body = result
        .rows
        .iter()
        .map(|row| row.iter().map(render_cell).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let mut widths = header.iter().map(|name| name.chars().count()).collect::<Vec<_>>();
    for row in &body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &header, &widths);
    let rule = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join("-+-");
    let _ = writeln!(out, "{rule}");
    for row in &body {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(" | ");
    let _ = writeln!(out, "{}", line.trim_end());
}

fn render_cell(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let text = text.replace(['\n', '\r', '\t'], " ");
    if text.chars().count() > MAX_CELL_WIDTH {
        let truncated = text.chars().take(MAX_CELL_WIDTH - 3).collect::<String>();
        format!("{truncated}...")
    } else {
        text
    }
}

pub fn render_tabs(registry: &TabRegistry) -> String {
    if registry.is_empty() {
        return "no open tabs\n".to_string();
    }
    let active = registry.active_tab_id();
    let mut out = String::new();
    for (index, tab) in registry.tabs().iter().enumerate() {
        let marker = if Some(tab.id()) == active { '*' } else { ' ' };
        let _ = writeln!(out, "{marker} {}. {}", index + 1, tab_label(tab));
    }
    out
}

fn tab_label(tab: &Tab) -> String {
    let mut label = tab.name().to_string();
    if tab.has_unsaved_changes() {
        label.push_str(" [modified]");
    }
    if tab.is_executing() {
        label.push_str(" [running]");
    }
    if tab.error().is_some() {
        label.push_str(" [error]");
    }
    label
}

pub fn render_tab(tab: &Tab) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} (connection {})", tab_label(tab), tab.connection_id());
    if tab.draft_query().is_empty() {
        out.push_str("(empty draft)\n");
    } else {
        let _ = writeln!(out, "{}", tab.draft_query());
    }
    if let Some(result) = tab.result() {
        out.push_str(&render_result(result));
    }
    if let Some(error) = tab.error() {
        let _ = writeln!(out, "error: {error}");
    }
    out
}

pub fn render_prompt(prompt: &ConfirmationPrompt) -> String {
    let mut out = String::from("confirmation required before running:\n");
    for line in prompt.sql.lines() {
        let _ = writeln!(out, "    {line}");
    }
    for warning in &prompt.warnings {
        let _ = writeln!(out, "  ! {warning}");
    }
    for checkbox in &prompt.checkboxes {
        let mark = if checkbox.checked { 'x' } else { ' ' };
        let _ = writeln!(out, "  [{mark}] {}", checkbox.label);
    }
    out.push_str(if prompt.can_proceed {
        "  :proceed to run, :cancel to drop\n"
    } else {
        "  tick every box with :check multi|data, or :cancel\n"
    });
    out
}

pub fn render_notification(notification: &Notification) -> String {
    let level = match notification.severity {
        Severity::Info => "info",
        Severity::Warning => "warn",
        Severity::Error => "error",
    };
    if notification.description.is_empty() {
        format!("[{level}] {}", notification.title)
    } else {
        format!(
            "[{level}] {}: {}",
            notification.title, notification.description
        )
    }
}
