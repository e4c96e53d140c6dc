//! Text reports
//!
//! Renders query results and the size database as Markdown tables.

use crate::query::{RankTrend, RankedModel, ReportedSize, SizeTrend};
use crate::storage::SizeStore;
use crate::types::download::format_date;

/// Human-readable parameter count of a top-K row
pub fn format_reported_size(size: ReportedSize) -> String {
    match size {
        ReportedSize::Unknown => "N/A".to_string(),
        ReportedSize::Unsupported => "Unsupported".to_string(),
        ReportedSize::Billions(size) if size < 1.0 => format!("{:.0}M", size * 1e3),
        ReportedSize::Billions(size) => format!("{:.1}B", size),
    }
}

/// Parameter count with a unit down to thousands
pub fn format_param_count(size_in_b: f64) -> String {
    if size_in_b < 1e-6 {
        "<1K".to_string()
    } else if size_in_b < 1e-3 {
        format!("{:.0}K", size_in_b * 1e6)
    } else if size_in_b < 1.0 {
        format!("{:.0}M", size_in_b * 1e3)
    } else {
        format!("{:.1}B", size_in_b)
    }
}

/// Render rows as a Markdown table with aligned columns
pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let render = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect();
        format!("| {} |\n", padded.join(" | "))
    };

    let mut out = render(headers.to_vec());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    out.push_str(&format!("|-{}-|\n", rule.join("-|-")));
    for row in rows {
        let mut cells: Vec<&str> = row.iter().map(String::as_str).collect();
        cells.resize(headers.len(), "");
        out.push_str(&render(cells));
    }
    out
}

pub fn top_models_markdown(models: &[RankedModel]) -> String {
    let rows: Vec<Vec<String>> = models
        .iter()
        .map(|model| {
            vec![
                model.rank.to_string(),
                model.model_id.clone(),
                model.download.to_string(),
                format_reported_size(model.size),
            ]
        })
        .collect();
    markdown_table(&["Rank", "Name", "Downloads", "Size"], &rows)
}

/// The size database sorted by size, largest first
///
/// Notes of failed estimates are cut to `max_note_len` characters.
pub fn size_table_markdown(store: &SizeStore, max_note_len: usize) -> String {
    let mut entries: Vec<_> = store.iter().collect();
    entries.sort_by(|a, b| {
        let a = a.size().unwrap_or(0.0);
        let b = b.size().unwrap_or(0.0);
        b.total_cmp(&a)
    });

    let rows: Vec<Vec<String>> = entries
        .into_iter()
        .map(|result| {
            let size = match result.size() {
                Some(size) => format_param_count(size),
                None => "N/A".to_string(),
            };
            let note: String = result
                .note()
                .unwrap_or_default()
                .chars()
                .take(max_note_len)
                .collect();
            vec![result.model_id.clone(), size, note.replace('|', "\\|")]
        })
        .collect();
    markdown_table(&["Model", "#Parameters", "Memo"], &rows)
}

/// One row per date; unranked cells are left blank
pub fn rank_trend_markdown(trend: &RankTrend) -> String {
    let mut headers = vec!["Date"];
    headers.extend(trend.models.iter().map(String::as_str));

    let rows: Vec<Vec<String>> = trend
        .rows
        .iter()
        .map(|(date, ranks)| {
            let mut row = vec![format_date(*date)];
            row.extend(ranks.iter().map(|rank| {
                rank.position()
                    .map(|position| position.to_string())
                    .unwrap_or_default()
            }));
            row
        })
        .collect();
    markdown_table(&headers, &rows)
}

/// Size spread per date, in millions when every mean is at most 1B
pub fn size_trend_markdown(trend: &SizeTrend) -> String {
    let in_millions = trend
        .rows
        .iter()
        .filter_map(|(_, stats)| stats.as_ref())
        .all(|stats| stats.mean <= 1.0);
    let (unit, scale) = if in_millions { ("M", 1e3) } else { ("B", 1.0) };

    let headers = [
        "Date".to_string(),
        format!("max-size ({})", unit),
        format!("avg-size ({})", unit),
        format!("min-size ({})", unit),
    ];
    let rows: Vec<Vec<String>> = trend
        .rows
        .iter()
        .map(|(date, stats)| match stats {
            Some(stats) => vec![
                format_date(*date),
                format!("{:.2}", stats.max * scale),
                format!("{:.2}", stats.mean * scale),
                format!("{:.2}", stats.min * scale),
            ],
            None => vec![format_date(*date)],
        })
        .collect();
    let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
    markdown_table(&headers, &rows)
}
