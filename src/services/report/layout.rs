//! Page layout: turns a [`ReportDocument`] into pages of draw operations.
//!
//! Coordinates are PDF points with the origin at the bottom-left corner;
//! the cursor starts below the top margin and moves down.

use super::metrics::{clip, measure, wrap_to_width, Weight};
use super::RenderError;
use crate::services::money::{format_currency, round2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Dates, amounts, statuses: one clipped line.
    SingleValue,
    /// Free text: every wrapped line is drawn.
    MultiLine,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub title: String,
    pub width: f64,
    pub kind: ColumnKind,
    pub align: Align,
}

impl Column {
    pub fn text(title: &str, width: f64) -> Self {
        Self {
            title: title.to_string(),
            width,
            kind: ColumnKind::MultiLine,
            align: Align::Left,
        }
    }

    pub fn value(title: &str, width: f64) -> Self {
        Self {
            title: title.to_string(),
            width,
            kind: ColumnKind::SingleValue,
            align: Align::Left,
        }
    }

    pub fn amount(title: &str, width: f64) -> Self {
        Self {
            title: title.to_string(),
            width,
            kind: ColumnKind::SingleValue,
            align: Align::Right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub cells: Vec<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub columns: Vec<Column>,
    pub rows: Vec<ReportRow>,
    pub included: bool,
}

impl Section {
    pub fn subtotal(&self) -> f64 {
        round2(self.rows.iter().map(|row| row.amount).sum())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOptions {
    pub page_width: f64,
    pub page_height: f64,
    pub margin: f64,
    pub font_size: f64,
    pub line_height: f64,
    pub title_size: f64,
    pub cell_padding: f64,
    pub repeat_headers: bool,
}

impl Default for LayoutOptions {
    /// A4 portrait.
    fn default() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin: 36.0,
            font_size: 8.0,
            line_height: 11.0,
            title_size: 14.0,
            cell_padding: 4.0,
            repeat_headers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub title: String,
    pub subtitle: Option<String>,
    pub sections: Vec<Section>,
    pub options: LayoutOptions,
}

impl ReportDocument {
    pub fn included_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|section| section.included)
    }

    /// Sum of the subtotals of the sections that are actually included.
    pub fn grand_total(&self) -> f64 {
        round2(self.included_sections().map(Section::subtotal).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.included_sections().all(|section| section.rows.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f64,
        y: f64,
        size: f64,
        weight: Weight,
        text: String,
    },
    Line {
        from: (f64, f64),
        to: (f64, f64),
        width: f64,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

impl Page {
    #[cfg(test)]
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            DrawOp::Line { .. } => None,
        })
    }
}

struct Pager<'a> {
    options: &'a LayoutOptions,
    pages: Vec<Page>,
    current: Page,
    cursor: f64,
}

impl<'a> Pager<'a> {
    fn new(options: &'a LayoutOptions) -> Self {
        Self {
            options,
            pages: Vec::new(),
            current: Page::default(),
            cursor: options.page_height - options.margin,
        }
    }

    fn left(&self) -> f64 {
        self.options.margin
    }

    fn right(&self) -> f64 {
        self.options.page_width - self.options.margin
    }

    fn fits(&self, height: f64) -> bool {
        self.cursor - height >= self.options.margin
    }

    /// Whole lines that still fit above the bottom margin.
    fn room(&self) -> usize {
        ((self.cursor - self.options.margin) / self.options.line_height + 1e-9).floor() as usize
    }

    /// Start a new page when `height` would cross the bottom margin.
    /// Returns whether a break happened.
    fn reserve(&mut self, height: f64) -> bool {
        if self.fits(height) || self.current.ops.is_empty() {
            return false;
        }
        self.break_page();
        true
    }

    fn break_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.cursor = self.options.page_height - self.options.margin;
    }

    fn text(&mut self, x: f64, baseline: f64, size: f64, weight: Weight, text: String) {
        if text.is_empty() {
            return;
        }
        self.current.ops.push(DrawOp::Text {
            x,
            y: baseline,
            size,
            weight,
            text,
        });
    }

    fn rule(&mut self) {
        let (left, right, y) = (self.left(), self.right(), self.cursor);
        self.current.ops.push(DrawOp::Line {
            from: (left, y),
            to: (right, y),
            width: 0.5,
        });
    }

    /// One line of text at the cursor, then advance.
    fn line(&mut self, text: String, size: f64, weight: Weight, align: Align) {
        let height = size.max(self.options.line_height) + 2.0;
        self.reserve(height);
        let baseline = self.cursor - size;
        let x = match align {
            Align::Left => self.left(),
            Align::Right => self.right() - measure(&text, size, weight),
        };
        self.text(x, baseline, size, weight, text);
        self.cursor -= height;
    }

    fn finish(mut self) -> Vec<Page> {
        if !self.current.ops.is_empty() || self.pages.is_empty() {
            self.pages.push(self.current);
        }
        self.pages
    }
}

pub fn layout(document: &ReportDocument) -> Result<Vec<Page>, RenderError> {
    if document.is_empty() {
        return Err(RenderError::Empty);
    }
    let options = &document.options;
    let mut pager = Pager::new(options);

    pager.line(document.title.clone(), options.title_size, Weight::Bold, Align::Left);
    if let Some(subtitle) = &document.subtitle {
        pager.line(subtitle.clone(), options.font_size, Weight::Regular, Align::Left);
    }

    for section in document.included_sections() {
        layout_section(&mut pager, section);
    }

    pager.cursor -= options.line_height / 2.0;
    pager.line(
        format!("Total: {}", format_currency(document.grand_total())),
        options.font_size + 2.0,
        Weight::Bold,
        Align::Right,
    );

    let mut pages = pager.finish();
    number_pages(&mut pages, options);
    Ok(pages)
}

fn layout_section(pager: &mut Pager<'_>, section: &Section) {
    let options = pager.options;
    let section_size = options.font_size + 2.0;

    // Title, header and at least one row stay together.
    pager.cursor -= options.line_height / 2.0;
    pager.reserve(section_size + 4.0 * options.line_height);
    pager.line(section.title.clone(), section_size, Weight::Bold, Align::Left);
    draw_header(pager, &section.columns);

    for row in &section.rows {
        let mut pending = row_lines(&section.columns, row, options);
        let height = line_count(&pending) as f64 * options.line_height;
        if pager.reserve(height) {
            continue_section(pager, section);
        }

        // A row taller than the page keeps its remaining lines for the next one.
        loop {
            let take = line_count(&pending).min(pager.room().max(1));
            let rest = pending
                .iter_mut()
                .map(|lines| lines.split_off(take.min(lines.len())))
                .collect::<Vec<_>>();
            draw_row(pager, &section.columns, &pending);
            pager.cursor -= take as f64 * options.line_height;

            if rest.iter().all(Vec::is_empty) {
                break;
            }
            pending = rest;
            pager.break_page();
            continue_section(pager, section);
        }
    }

    pager.rule();
    pager.cursor -= 2.0;
    pager.line(
        format!("Subtotal: {}", format_currency(section.subtotal())),
        options.font_size,
        Weight::Bold,
        Align::Right,
    );
}

fn continue_section(pager: &mut Pager<'_>, section: &Section) {
    let options = pager.options;
    if !options.repeat_headers {
        return;
    }
    pager.line(
        format!("{} (cont.)", section.title),
        options.font_size,
        Weight::Bold,
        Align::Left,
    );
    draw_header(pager, &section.columns);
}

fn line_count(cells: &[Vec<String>]) -> usize {
    cells.iter().map(Vec::len).max().unwrap_or(0).max(1)
}

fn draw_header(pager: &mut Pager<'_>, columns: &[Column]) {
    let options = pager.options;
    let titles = columns
        .iter()
        .map(|column| {
            vec![clip(
                &column.title,
                column.width - options.cell_padding,
                options.font_size,
                Weight::Bold,
            )]
        })
        .collect::<Vec<_>>();
    draw_cells(pager, columns, &titles, Weight::Bold);
    pager.cursor -= options.line_height;
    pager.rule();
    pager.cursor -= 2.0;
}

fn row_lines(columns: &[Column], row: &ReportRow, options: &LayoutOptions) -> Vec<Vec<String>> {
    columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let cell = row.cells.get(index).map(String::as_str).unwrap_or_default();
            let inner = column.width - options.cell_padding;
            match column.kind {
                ColumnKind::SingleValue => {
                    let first = cell.lines().next().unwrap_or_default().trim();
                    if first.is_empty() {
                        Vec::new()
                    } else {
                        vec![clip(first, inner, options.font_size, Weight::Regular)]
                    }
                }
                ColumnKind::MultiLine => wrap_to_width(cell, inner, options.font_size, Weight::Regular)
                    .into_iter()
                    .map(|line| clip(&line, inner, options.font_size, Weight::Regular))
                    .collect(),
            }
        })
        .collect()
}

fn draw_row(pager: &mut Pager<'_>, columns: &[Column], cells: &[Vec<String>]) {
    draw_cells(pager, columns, cells, Weight::Regular);
}

fn draw_cells(pager: &mut Pager<'_>, columns: &[Column], cells: &[Vec<String>], weight: Weight) {
    let options = pager.options;
    let mut x = pager.left();
    for (column, lines) in columns.iter().zip(cells) {
        for (index, line) in lines.iter().enumerate() {
            let baseline = pager.cursor - (index as f64 + 1.0) * options.line_height
                + (options.line_height - options.font_size) / 2.0;
            let left = match column.align {
                Align::Left => x + options.cell_padding / 2.0,
                Align::Right => {
                    x + column.width
                        - options.cell_padding / 2.0
                        - measure(line, options.font_size, weight)
                }
            };
            pager.text(left, baseline, options.font_size, weight, line.clone());
        }
        x += column.width;
    }
}

fn number_pages(pages: &mut [Page], options: &LayoutOptions) {
    let count = pages.len();
    let size = options.font_size - 1.0;
    for (index, page) in pages.iter_mut().enumerate() {
        let label = format!("{}/{}", index + 1, count);
        page.ops.push(DrawOp::Text {
            x: options.page_width - options.margin - measure(&label, size, Weight::Regular),
            y: options.margin / 2.0,
            size,
            weight: Weight::Regular,
            text: label,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{layout, Column, LayoutOptions, ReportDocument, ReportRow, Section};
    use crate::services::report::RenderError;

    fn row(label: &str, amount: f64) -> ReportRow {
        ReportRow {
            cells: vec![
                "15/01/2025".to_string(),
                label.to_string(),
                crate::services::money::format_currency(amount),
            ],
            amount,
        }
    }

    fn section(title: &str, rows: Vec<ReportRow>, included: bool) -> Section {
        Section {
            title: title.to_string(),
            columns: vec![
                Column::value("Date", 60.0),
                Column::text("Description", 120.0),
                Column::amount("Amount", 70.0),
            ],
            rows,
            included,
        }
    }

    fn document(sections: Vec<Section>, options: LayoutOptions) -> ReportDocument {
        ReportDocument {
            title: "Payables".to_string(),
            subtitle: Some("January 2025".to_string()),
            sections,
            options,
        }
    }

    fn all_text(pages: &[super::Page]) -> Vec<String> {
        pages
            .iter()
            .flat_map(|page| page.texts().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn empty_input_is_rejected_before_layout() {
        let doc = document(
            vec![
                section("Project costs", Vec::new(), true),
                section("Fixed costs", vec![row("Rent", 10.0)], false),
            ],
            LayoutOptions::default(),
        );
        assert!(matches!(layout(&doc), Err(RenderError::Empty)));
    }

    #[test]
    fn totals_only_count_included_sections() {
        let doc = document(
            vec![
                section("Project costs", vec![row("Ana", 100.0), row("Som", 50.5)], true),
                section("Fixed costs", vec![row("Rent", 1000.0)], false),
            ],
            LayoutOptions::default(),
        );
        assert_eq!(doc.grand_total(), 150.5);

        let texts = all_text(&layout(&doc).expect("pages"));
        assert!(texts.contains(&"Subtotal: R$ 150,50".to_string()));
        assert!(texts.contains(&"Total: R$ 150,50".to_string()));
        assert!(!texts.iter().any(|text| text.contains("Fixed costs")));
        assert!(!texts.iter().any(|text| text == "Rent"));
    }

    #[test]
    fn multi_line_cells_wrap_and_single_values_clip() {
        let options = LayoutOptions::default();
        let long = "Montagem e desmontagem do estande principal com iluminação cênica completa";
        let mut wide = row(long, 1.0);
        wide.cells[0] = "15/01/2025 and a note that does not fit".to_string();
        let doc = document(vec![section("Project costs", vec![wide], true)], options);

        let texts = all_text(&layout(&doc).expect("pages"));
        let description_lines = texts
            .iter()
            .filter(|text| long.contains(text.as_str()) && text.as_str() != long)
            .count();
        assert!(description_lines >= 2, "description should wrap: {texts:?}");
        assert!(texts.iter().any(|text| text.starts_with("15/01/2025") && text.ends_with('…')));
    }

    #[test]
    fn long_sections_paginate_and_repeat_headers() {
        let rows = (0..150).map(|index| row(&format!("Line {index}"), 1.0)).collect();
        let doc = document(vec![section("Project costs", rows, true)], LayoutOptions::default());
        let pages = layout(&doc).expect("pages");
        assert!(pages.len() >= 2);

        let second = pages[1].texts().collect::<Vec<_>>();
        assert!(second.contains(&"Description"));
        assert!(second.contains(&"Project costs (cont.)"));
        assert!(second.contains(&format!("2/{}", pages.len()).as_str()));

        let texts = all_text(&pages);
        assert!(texts.contains(&"Line 149".to_string()));
        assert!(texts.contains(&"Total: R$ 150,00".to_string()));
    }

    #[test]
    fn headers_can_be_left_off_continuation_pages() {
        let rows = (0..150).map(|index| row(&format!("Line {index}"), 1.0)).collect();
        let options = LayoutOptions {
            repeat_headers: false,
            ..LayoutOptions::default()
        };
        let pages = layout(&document(vec![section("Project costs", rows, true)], options)).expect("pages");
        assert!(pages.len() >= 2);
        assert!(!pages[1].texts().any(|text| text == "Description"));
    }

    fn assert_within_margins(pages: &[super::Page], margin: f64) {
        let count = pages.len();
        for (index, page) in pages.iter().enumerate() {
            let page_label = format!("{}/{count}", index + 1);
            for op in &page.ops {
                if let super::DrawOp::Text { y, text, .. } = op {
                    if *text == page_label {
                        continue;
                    }
                    assert!(*y >= margin, "{text} drawn at {y}");
                }
            }
        }
    }

    #[test]
    fn nothing_is_drawn_below_the_bottom_margin() {
        let rows = (0..300).map(|index| row(&format!("Line {index}"), 1.0)).collect();
        let options = LayoutOptions::default();
        let margin = options.margin;
        let pages = layout(&document(vec![section("Project costs", rows, true)], options)).expect("pages");
        assert_within_margins(&pages, margin);
    }

    #[test]
    fn rows_taller_than_a_page_continue_on_the_next() {
        let description = (0..1500)
            .map(|index| format!("w{index}"))
            .collect::<Vec<_>>()
            .join(" ");
        let options = LayoutOptions::default();
        let margin = options.margin;
        let doc = document(
            vec![section("Project costs", vec![row(&description, 42.0)], true)],
            options,
        );
        let pages = layout(&doc).expect("pages");
        assert!(pages.len() >= 3, "expected the row to span pages, got {}", pages.len());
        assert_within_margins(&pages, margin);

        assert!(pages[1].texts().any(|text| text == "Project costs (cont.)"));
        let texts = all_text(&pages);
        let words = texts
            .iter()
            .flat_map(|text| text.split_whitespace())
            .filter(|word| word.starts_with('w'))
            .count();
        assert_eq!(words, 1500);
        assert!(texts.contains(&"Total: R$ 42,00".to_string()));
    }
}
