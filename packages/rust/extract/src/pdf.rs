//! PDF bill text with amendment markup.
//!
//! Legislatures print deleted language struck through and new language
//! underlined. We walk each page's content stream with `lopdf`, keep the text
//! runs and the thin horizontal bars (stroked lines or filled hairline
//! rectangles), and classify a run by where a bar crosses it:
//!
//! - bar through the middle of the glyphs: `[DELETED: …]`
//! - bar at or just below the baseline: `[INSERTED: …]`
//!
//! Glyph widths are estimated (half an em per character), which is good
//! enough to decide whether a bar spans a run.

use std::collections::HashMap;
use std::sync::LazyLock;

use legisync_shared::{LegisyncError, Result};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use tracing::debug;

use crate::{ExtractedText, MarkerCounts};

/// Estimated glyph advance, as a fraction of the font size.
const CHAR_WIDTH_EM: f32 = 0.5;
/// Runs whose baselines differ by less than this (points) share a line.
const LINE_TOLERANCE: f32 = 2.0;
/// Minimum share of a run's width a bar must cover.
const MIN_BAR_OVERLAP: f32 = 0.5;
/// Filled rectangles thinner than this (points) count as rules.
const MAX_BAR_THICKNESS: f32 = 3.0;
/// TJ adjustment (thousandths of an em) treated as a word break.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

pub(crate) fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| LegisyncError::parsing(format!("invalid PDF: {e}")))?;

    let mut pages_text = Vec::new();
    let mut markers = MarkerCounts::default();

    for (page_no, page_id) in doc.get_pages() {
        let data = doc
            .get_page_content(page_id)
            .map_err(|e| LegisyncError::parsing(format!("page {page_no}: {e}")))?;
        let content = Content::decode(&data)
            .map_err(|e| LegisyncError::parsing(format!("page {page_no}: {e}")))?;

        let fonts = page_font_names(&doc, page_id);
        let scan = scan_page(&content.operations, &fonts);
        debug!(page = page_no, runs = scan.runs.len(), bars = scan.bars.len(), "scanned page");

        let text = layout_page(&scan, &mut markers);
        if !text.is_empty() {
            pages_text.push(text);
        }
    }

    if pages_text.is_empty() {
        return Err(LegisyncError::parsing("PDF has no extractable text"));
    }

    let raw_text = pages_text.join("\n\n");
    let (title, sections) = structure(&raw_text);

    Ok(ExtractedText {
        official_title: title.clone(),
        title,
        sections,
        raw_text,
        markers,
    })
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// PDF affine matrix `[a b c d e f]` (row-vector convention).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`: apply `self` first, then `other`.
    fn then(self, other: Matrix) -> Self {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn apply(self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn vertical_scale(self) -> f32 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }
}

#[derive(Debug, Clone)]
struct TextRun {
    x0: f32,
    x1: f32,
    y: f32,
    size: f32,
    text: String,
    font: String,
}

/// A horizontal rule in device space.
#[derive(Debug, Clone, Copy)]
struct Bar {
    x0: f32,
    x1: f32,
    y: f32,
}

#[derive(Debug, Default)]
struct PageScan {
    runs: Vec<TextRun>,
    bars: Vec<Bar>,
}

// ---------------------------------------------------------------------------
// Content stream interpretation
// ---------------------------------------------------------------------------

struct ScanState<'a> {
    fonts: &'a HashMap<Vec<u8>, String>,
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    font_name: String,
    leading: f32,
    current_point: Option<(f32, f32)>,
    segments: Vec<((f32, f32), (f32, f32))>,
    rects: Vec<[f32; 4]>,
    scan: PageScan,
}

fn scan_page(ops: &[Operation], fonts: &HashMap<Vec<u8>, String>) -> PageScan {
    let mut st = ScanState {
        fonts,
        ctm: Matrix::IDENTITY,
        ctm_stack: Vec::new(),
        tm: Matrix::IDENTITY,
        tlm: Matrix::IDENTITY,
        font_size: 0.0,
        font_name: String::new(),
        leading: 0.0,
        current_point: None,
        segments: Vec::new(),
        rects: Vec::new(),
        scan: PageScan::default(),
    };

    for op in ops {
        let n = |i: usize| op.operands.get(i).and_then(number);
        match op.operator.as_str() {
            "q" => st.ctm_stack.push(st.ctm),
            "Q" => st.ctm = st.ctm_stack.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(m) = matrix_operands(op) {
                    st.ctm = m.then(st.ctm);
                }
            }
            "BT" => {
                st.tm = Matrix::IDENTITY;
                st.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(Object::Name(key)) = op.operands.first() {
                    st.font_name = st.fonts.get(key).cloned().unwrap_or_default();
                }
                st.font_size = n(1).unwrap_or(st.font_size);
            }
            "TL" => st.leading = n(0).unwrap_or(st.leading),
            "Td" => st.next_line(n(0).unwrap_or(0.0), n(1).unwrap_or(0.0)),
            "TD" => {
                let ty = n(1).unwrap_or(0.0);
                st.leading = -ty;
                st.next_line(n(0).unwrap_or(0.0), ty);
            }
            "Tm" => {
                if let Some(m) = matrix_operands(op) {
                    st.tm = m;
                    st.tlm = m;
                }
            }
            "T*" => st.next_line(0.0, -st.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    st.show(&decode_pdf_string(bytes), 0.0);
                }
            }
            "'" => {
                st.next_line(0.0, -st.leading);
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    st.show(&decode_pdf_string(bytes), 0.0);
                }
            }
            "\"" => {
                st.next_line(0.0, -st.leading);
                if let Some(Object::String(bytes, _)) = op.operands.get(2) {
                    st.show(&decode_pdf_string(bytes), 0.0);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    let mut text = String::new();
                    let mut adjust = 0.0;
                    for item in items {
                        match item {
                            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                            other => {
                                if let Some(k) = number(other) {
                                    if k < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                        text.push(' ');
                                    }
                                    adjust += k;
                                }
                            }
                        }
                    }
                    st.show(&text, adjust);
                }
            }
            "m" => {
                if let (Some(x), Some(y)) = (n(0), n(1)) {
                    st.current_point = Some(st.ctm.apply(x, y));
                }
            }
            "l" => {
                if let (Some(x), Some(y)) = (n(0), n(1)) {
                    let to = st.ctm.apply(x, y);
                    if let Some(from) = st.current_point {
                        st.segments.push((from, to));
                    }
                    st.current_point = Some(to);
                }
            }
            "re" => {
                if let (Some(x), Some(y), Some(w), Some(h)) = (n(0), n(1), n(2), n(3)) {
                    let (x0, y0) = st.ctm.apply(x, y);
                    let (x1, y1) = st.ctm.apply(x + w, y + h);
                    st.rects.push([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]);
                }
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => st.paint_path(),
            "n" => st.clear_path(),
            _ => {}
        }
    }

    st.scan
}

impl ScanState<'_> {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(self.tlm);
        self.tm = self.tlm;
    }

    /// Record a run and advance the text matrix past it.
    fn show(&mut self, text: &str, tj_adjust: f32) {
        if text.is_empty() {
            return;
        }
        let device = self.tm.then(self.ctm);
        let (x0, y) = device.apply(0.0, 0.0);
        let advance = text.chars().count() as f32 * self.font_size * CHAR_WIDTH_EM
            - tj_adjust / 1000.0 * self.font_size;
        self.tm = Matrix::translate(advance, 0.0).then(self.tm);
        let (x1, _) = self.tm.then(self.ctm).apply(0.0, 0.0);

        if text.trim().is_empty() {
            return;
        }
        self.scan.runs.push(TextRun {
            x0: x0.min(x1),
            x1: x0.max(x1),
            y,
            size: self.font_size * device.vertical_scale(),
            text: text.to_string(),
            font: self.font_name.clone(),
        });
    }

    fn paint_path(&mut self) {
        for ((xa, ya), (xb, yb)) in self.segments.drain(..) {
            if (ya - yb).abs() <= 1.0 && (xa - xb).abs() > 1.0 {
                self.scan.bars.push(Bar {
                    x0: xa.min(xb),
                    x1: xa.max(xb),
                    y: (ya + yb) / 2.0,
                });
            }
        }
        for [x0, y0, x1, y1] in self.rects.drain(..) {
            let height = y1 - y0;
            if height <= MAX_BAR_THICKNESS && (x1 - x0) > 3.0 * height.max(0.1) {
                self.scan.bars.push(Bar {
                    x0,
                    x1,
                    y: (y0 + y1) / 2.0,
                });
            }
        }
        self.current_point = None;
    }

    fn clear_path(&mut self) {
        self.segments.clear();
        self.rects.clear();
        self.current_point = None;
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn matrix_operands(op: &Operation) -> Option<Matrix> {
    let mut m = [0.0f32; 6];
    for (i, slot) in m.iter_mut().enumerate() {
        *slot = op.operands.get(i).and_then(number)?;
    }
    Some(Matrix(m))
}

/// UTF-16BE when BOM-prefixed, otherwise one byte per character.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

// ---------------------------------------------------------------------------
// Fonts
// ---------------------------------------------------------------------------

/// Resource name → `BaseFont` for a page, following `Parent` inheritance.
fn page_font_names(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, String> {
    let mut names = HashMap::new();
    let mut node = doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok());
    let mut hops = 0;

    while let Some(dict) = node {
        let fonts = dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
            .and_then(|res| res.get(b"Font").ok())
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok());
        if let Some(fonts) = fonts {
            for (key, font) in fonts.iter() {
                let base = resolve(doc, font)
                    .and_then(|o| o.as_dict().ok())
                    .and_then(|f| f.get(b"BaseFont").ok())
                    .and_then(|o| match o {
                        Object::Name(n) => Some(String::from_utf8_lossy(n).into_owned()),
                        _ => None,
                    })
                    .unwrap_or_default();
                names.insert(key.clone(), base);
            }
            break;
        }
        hops += 1;
        if hops > 32 {
            break;
        }
        node = dict
            .get(b"Parent")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok());
    }
    names
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Plain,
    Deleted,
    Inserted,
}

fn classify(run: &TextRun, bars: &[Bar]) -> Mark {
    if run.font.to_lowercase().contains("strike") {
        return Mark::Deleted;
    }
    let width = run.x1 - run.x0;
    if width <= 0.0 || run.size <= 0.0 {
        return Mark::Plain;
    }
    let covering = |bar: &&Bar| {
        let overlap = run.x1.min(bar.x1) - run.x0.max(bar.x0);
        overlap >= MIN_BAR_OVERLAP * width
    };
    let offsets: Vec<f32> = bars
        .iter()
        .filter(covering)
        .map(|bar| (bar.y - run.y) / run.size)
        .collect();

    if offsets.iter().any(|o| (0.15..=0.6).contains(o)) {
        Mark::Deleted
    } else if offsets.iter().any(|o| (-0.25..=0.05).contains(o)) {
        Mark::Inserted
    } else {
        Mark::Plain
    }
}

/// Arrange runs top-to-bottom, left-to-right, wrapping marked spans.
fn layout_page(scan: &PageScan, markers: &mut MarkerCounts) -> String {
    let mut runs: Vec<&TextRun> = scan.runs.iter().collect();
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x0.total_cmp(&b.x0)));

    let mut lines: Vec<Vec<&TextRun>> = Vec::new();
    for run in runs {
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= LINE_TOLERANCE => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    let mut out = Vec::new();
    for mut line in lines {
        line.sort_by(|a, b| a.x0.total_cmp(&b.x0));

        let mut spans: Vec<(Mark, String)> = Vec::new();
        let mut prev_end: Option<f32> = None;
        for run in line {
            let mark = classify(run, &scan.bars);
            let gap = prev_end.map(|end| run.x0 - end > 0.15 * run.size);
            match spans.last_mut() {
                Some((last, text)) if *last == mark => {
                    if gap == Some(true) && !text.ends_with(' ') {
                        text.push(' ');
                    }
                    text.push_str(&run.text);
                }
                _ => spans.push((mark, run.text.clone())),
            }
            prev_end = Some(run.x1);
        }

        let rendered: Vec<String> = spans
            .into_iter()
            .map(|(mark, text)| {
                let text = text.trim().to_string();
                match mark {
                    Mark::Plain => text,
                    Mark::Deleted => {
                        markers.deletions += 1;
                        format!("[DELETED: {text}]")
                    }
                    Mark::Inserted => {
                        markers.insertions += 1;
                        format!("[INSERTED: {text}]")
                    }
                }
            })
            .collect();
        out.push(rendered.join(" "));
    }
    out.join("\n")
}

/// Title line and `Section`/`§`/`1.`-delimited sections.
fn structure(raw: &str) -> (String, Vec<String>) {
    static SECTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(section|§|\d+\.)").expect("valid regex"));

    let mut title = String::new();
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let upper = line.to_uppercase();
        if title.is_empty()
            && (upper.contains("AN ACT") || upper.contains("BILL") || line.chars().count() > 50)
        {
            title = line.to_string();
        } else if SECTION_RE.is_match(line) {
            if !current.is_empty() {
                sections.push(current.join("\n"));
                current.clear();
            }
            current.push(line);
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        sections.push(current.join("\n"));
    }
    (title, sections)
}
