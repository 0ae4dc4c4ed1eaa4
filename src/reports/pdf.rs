//! PDF rendering of a progress summary: title, generation date, then one
//! table per section (summary, per-status, per-component), paginated.

use printpdf::{BuiltinFont, Mm, PdfDocument};

use super::ProgressSummary;
use crate::domain::MeasureStatus;
use crate::error::{Result, ServerError};

const PAGE_WIDTH: f32 = 215.9;
const PAGE_HEIGHT: f32 = 279.4;
const MARGIN: f32 = 20.0;
const LINE_STEP: f32 = 7.0;

enum Line {
    Title(String),
    Heading(String),
    TableHeader(Vec<String>),
    TableRow(Vec<String>),
    Spacer,
}

fn pdf_err(e: printpdf::Error) -> ServerError {
    ServerError::Internal(format!("pdf error: {e}"))
}

/// Layout of one table row: fixed column stops in millimetres.
fn columns(cells: &[String]) -> Vec<(f32, &str)> {
    let stops = [MARGIN, MARGIN + 90.0, MARGIN + 130.0];
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| (stops[i.min(stops.len() - 1)], cell.as_str()))
        .collect()
}

fn build_lines(summary: &ProgressSummary) -> Vec<Line> {
    let mut lines = vec![
        Line::Title(summary.title.clone()),
        Line::TableRow(vec![format!("Fecha: {}", summary.generated_on.format("%d/%m/%Y"))]),
        Line::Spacer,
        Line::Heading("Resumen General".to_string()),
        Line::TableRow(vec![
            "Total de Medidas".to_string(),
            summary.total_measures.to_string(),
        ]),
        Line::TableRow(vec![
            "Avance Global".to_string(),
            format!("{:.1}%", summary.mean_progress),
        ]),
        Line::Spacer,
        Line::Heading("Estado de las Medidas".to_string()),
        Line::TableHeader(vec![
            "Estado".to_string(),
            "Total".to_string(),
            "Avance Promedio".to_string(),
        ]),
    ];

    for row in &summary.by_status {
        let label = MeasureStatus::parse(&row.status)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| row.status.clone());
        lines.push(Line::TableRow(vec![
            label,
            row.count.to_string(),
            format!("{:.1}%", row.mean_progress),
        ]));
    }

    lines.push(Line::Spacer);
    lines.push(Line::Heading("Avance por Componente".to_string()));
    lines.push(Line::TableHeader(vec![
        "Componente".to_string(),
        "Total Medidas".to_string(),
        "Avance".to_string(),
    ]));
    for row in &summary.by_component {
        lines.push(Line::TableRow(vec![
            row.name.clone(),
            row.count.to_string(),
            format!("{:.1}%", row.mean_progress),
        ]));
    }

    lines
}

pub fn render(summary: &ProgressSummary) -> Result<Vec<u8>> {
    let (doc, first_page, first_layer) =
        PdfDocument::new(&summary.title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Capa 1");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_err)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_err)?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = PAGE_HEIGHT - MARGIN;

    for line in build_lines(summary) {
        if y < MARGIN + LINE_STEP {
            let (page, new_layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Capa 1");
            layer = doc.get_page(page).get_layer(new_layer);
            y = PAGE_HEIGHT - MARGIN;
        }

        match line {
            Line::Title(text) => {
                layer.use_text(text, 20.0, Mm(MARGIN), Mm(y), &bold);
                y -= LINE_STEP * 2.0;
            }
            Line::Heading(text) => {
                layer.use_text(text, 14.0, Mm(MARGIN), Mm(y), &bold);
                y -= LINE_STEP * 1.5;
            }
            Line::TableHeader(cells) => {
                for (x, cell) in columns(&cells) {
                    layer.use_text(cell, 11.0, Mm(x), Mm(y), &bold);
                }
                y -= LINE_STEP;
            }
            Line::TableRow(cells) => {
                for (x, cell) in columns(&cells) {
                    layer.use_text(cell, 11.0, Mm(x), Mm(y), &regular);
                }
                y -= LINE_STEP;
            }
            Line::Spacer => {
                y -= LINE_STEP;
            }
        }
    }

    doc.save_to_bytes().map_err(pdf_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{ComponentRow, StatusRow};

    #[test]
    fn test_render_produces_pdf_bytes() {
        let summary = ProgressSummary {
            title: "Reporte de Avance Global".to_string(),
            generated_on: chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            organization: None,
            total_measures: 10,
            mean_progress: 42.5,
            by_status: vec![StatusRow {
                status: "en_proceso".to_string(),
                count: 10,
                mean_progress: 42.5,
            }],
            by_component: vec![ComponentRow {
                id: 1,
                name: "Calidad del Aire".to_string(),
                code: "AIRE".to_string(),
                color: "#FF5733".to_string(),
                count: 10,
                mean_progress: 42.5,
            }],
        };
        let bytes = render(&summary).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_long_report_paginates() {
        let by_component = (0..120)
            .map(|i| ComponentRow {
                id: i,
                name: format!("Componente {i}"),
                code: format!("C{i}"),
                color: String::new(),
                count: 1,
                mean_progress: 50.0,
            })
            .collect();
        let summary = ProgressSummary {
            title: "Reporte de Avance Global".to_string(),
            generated_on: chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            organization: None,
            total_measures: 120,
            mean_progress: 50.0,
            by_status: vec![],
            by_component,
        };
        let bytes = render(&summary).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
