//! The slip region handed to the rasterizer: a small laid-out element tree
//! with its stylesheets, plus the builder that lays derived cells out on the
//! printed 9 x 11 grid.

use tracing::debug;

use crate::format::escape_html;
use crate::ledger::{CellId, DerivedCells};

/// Layout box in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Live value of a form control
    pub value: Option<String>,
    pub frame: Option<Rect>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            classes: Vec::new(),
            attrs: Vec::new(),
            children: Vec::new(),
            value: None,
            frame: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_frame(mut self, frame: Rect) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea")
    }

    /// Text nodes directly under this element
    pub fn own_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|child| match child {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) => text.push_str(t),
                Node::Element(e) => text.push_str(&e.text_content()),
            }
        }
        text
    }

    /// What a painter should draw inside this element's box
    pub fn display_text(&self) -> String {
        match &self.value {
            Some(value) if self.is_form_control() => value.clone(),
            _ => self.text_content(),
        }
    }

    /// Depth-first visit of this element and every descendant element
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Element)) {
        visit(self);
        for child in &self.children {
            if let Node::Element(e) = child {
                e.walk(visit);
            }
        }
    }

    /// Swap every input/textarea below this element for a text node carrying
    /// its current value. Serialization would otherwise lose the typed state.
    pub fn inline_form_values(&mut self) -> usize {
        let mut replaced = 0;
        for child in &mut self.children {
            let flattened = match child {
                Node::Element(e) if e.is_form_control() => Some(e.value.clone().unwrap_or_default()),
                Node::Element(e) => {
                    replaced += e.inline_form_values();
                    None
                }
                Node::Text(_) => None,
            };
            if let Some(text) = flattened {
                *child = Node::Text(text);
                replaced += 1;
            }
        }
        replaced
    }

    /// Serialize as XHTML (always well-formed, void tags self-closed)
    pub fn to_xhtml(&self) -> String {
        let mut out = String::new();
        self.write_xhtml(&mut out);
        out
    }

    fn write_xhtml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        if !self.classes.is_empty() {
            out.push_str(&format!(" class=\"{}\"", escape_html(&self.classes.join(" "))));
        }
        for (name, value) in &self.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
        }
        if self.tag == "input" {
            if let Some(value) = &self.value {
                out.push_str(&format!(" value=\"{}\"", escape_html(value)));
            }
        }

        let is_void = matches!(self.tag.as_str(), "input" | "img" | "br");
        if is_void && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');

        if self.tag == "textarea" {
            if let Some(value) = &self.value {
                out.push_str(&escape_html(value));
            }
        }
        for child in &self.children {
            match child {
                Node::Text(text) => out.push_str(&escape_html(text)),
                Node::Element(e) => e.write_xhtml(out),
            }
        }

        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// A stylesheet attached to the region. `origin` is `None` for inline sheets.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSheet {
    pub origin: Option<String>,
    pub rules: Vec<String>,
}

impl StyleSheet {
    pub fn inline(rules: &[&str]) -> Self {
        Self {
            origin: None,
            rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn linked(href: &str, rules: &[&str]) -> Self {
        Self {
            origin: origin_of(href),
            rules: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn is_readable_from(&self, origin: &str) -> bool {
        match &self.origin {
            None => true,
            Some(sheet_origin) => sheet_origin.eq_ignore_ascii_case(origin),
        }
    }
}

/// `scheme://host[:port]` of an absolute http(s) URL; `None` for relative,
/// `data:` and `blob:` references, which count as same-origin.
pub fn origin_of(url: &str) -> Option<String> {
    let lower = url.trim().to_ascii_lowercase();
    let rest_start = if lower.starts_with("https://") {
        8
    } else if lower.starts_with("http://") {
        7
    } else {
        return None;
    };
    let host_end = lower[rest_start..]
        .find(['/', '?', '#'])
        .map(|i| rest_start + i)
        .unwrap_or(lower.len());
    Some(lower[..host_end].to_string())
}

/// The captured DOM region stand-in
#[derive(Debug, Clone, PartialEq)]
pub struct SlipRegion {
    pub root: Element,
    pub stylesheets: Vec<StyleSheet>,
    /// Origin the region was loaded from
    pub origin: String,
    pub width: f64,
    pub height: f64,
    /// Resolved styling the painters draw with
    pub theme: SlipTheme,
}

impl SlipRegion {
    pub fn layout_box(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    /// Rules from every sheet the region's origin may read, joined into one
    /// inline sheet. Cross-origin sheets are skipped.
    pub fn same_origin_css(&self) -> String {
        let mut css = Vec::new();
        for sheet in &self.stylesheets {
            if sheet.is_readable_from(&self.origin) {
                css.extend(sheet.rules.iter().cloned());
            } else {
                debug!(
                    "Skipping cross-origin stylesheet {}",
                    sheet.origin.as_deref().unwrap_or("?")
                );
            }
        }
        css.join("\n")
    }

    /// Clone with form controls flattened to text
    pub fn snapshot(&self) -> SlipRegion {
        let mut copy = self.clone();
        let replaced = copy.root.inline_form_values();
        debug!("Inlined {} form controls into the snapshot", replaced);
        copy
    }

    /// Images whose pixels would poison a canvas: cross-origin without a
    /// `crossorigin` grant
    pub fn tainting_images(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.root.walk(&mut |e| {
            if e.tag != "img" || e.attr("crossorigin").is_some() {
                return;
            }
            if let Some(src) = e.attr("src") {
                if let Some(img_origin) = origin_of(src) {
                    if !img_origin.eq_ignore_ascii_case(&self.origin) {
                        found.push(src.to_string());
                    }
                }
            }
        });
        found
    }
}

/// Colours and metrics of the printed slip
#[derive(Debug, Clone, PartialEq)]
pub struct SlipTheme {
    pub border_color: String,
    pub label_color: String,
    pub text_color: String,
    pub excess_color: String,
    pub shortage_color: String,
    pub font_family: String,
    pub font_size: f64,
    pub column_width: f64,
    pub row_height: f64,
    pub title_height: f64,
}

impl Default for SlipTheme {
    fn default() -> Self {
        Self {
            border_color: "#333333".to_string(),
            label_color: "#555555".to_string(),
            text_color: "#111111".to_string(),
            excess_color: "#0a7a2f".to_string(),
            shortage_color: "#b00020".to_string(),
            font_family: "DejaVu Sans, Arial, sans-serif".to_string(),
            font_size: 12.0,
            column_width: 96.0,
            row_height: 28.0,
            title_height: 36.0,
        }
    }
}

pub const GRID_COLUMNS: usize = 9;
pub const GRID_ROWS: usize = 11;

/// Fixed captions printed beside the figures, by slot
const LABELS: &[(&str, &str)] = &[
    ("A1", "MILLER NAME"),
    ("A2", "PARTY NAME"),
    ("A3", "BILL NO"),
    ("A4", "ARRIVAL DT"),
    ("A5", "QTY"),
    ("C5", "RATE"),
    ("F5", "AMOUNT"),
    ("A6", "LORRY HIRE"),
    ("D6", "TOTAL"),
    ("F6", "TOTAL"),
    ("H6", "CHQ AM"),
    ("A7", "DISCOUNT"),
    ("D7", "NET"),
    ("H7", "CHQ NO"),
    ("A8", "SELLER COM"),
    ("D8", "PAID"),
    ("H8", "CHQ DT"),
    ("D9", "BALANCE"),
    ("H9", "BANK"),
    ("A10", "Q-DIFF"),
    ("C10", "REMARKS"),
    ("A11", "TOTAL"),
    ("D11", "TOTAL"),
];

/// Cells the user types into directly; they stay editable on the sheet
const EDITABLE: &[CellId] = &[
    CellId::MillerName,
    CellId::PartyName,
    CellId::BillNo,
    CellId::PaymentRef,
    CellId::Bank,
];

/// Builds the slip region from a derived cell set
#[derive(Debug, Clone)]
pub struct SlipSheet {
    theme: SlipTheme,
    title: String,
    origin: String,
}

impl Default for SlipSheet {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipSheet {
    pub fn new() -> Self {
        Self {
            theme: SlipTheme::default(),
            title: "PATTI NOTE".to_string(),
            origin: "app://patti".to_string(),
        }
    }

    pub fn size(&self) -> (f64, f64) {
        let t = &self.theme;
        (
            t.column_width * GRID_COLUMNS as f64,
            t.title_height + t.row_height * GRID_ROWS as f64,
        )
    }

    fn cell_frame(&self, column: usize, row: usize) -> Rect {
        let t = &self.theme;
        Rect::new(
            column as f64 * t.column_width,
            t.title_height + (row - 1) as f64 * t.row_height,
            t.column_width,
            t.row_height,
        )
    }

    pub fn render(&self, derived: &DerivedCells) -> SlipRegion {
        let (width, height) = self.size();
        let mut table = Element::new("table")
            .with_class("grid")
            .with_frame(Rect::new(0.0, self.theme.title_height, width, height - self.theme.title_height));

        for row in 1..=GRID_ROWS {
            let mut tr = Element::new("tr");
            for column in 0..GRID_COLUMNS {
                let slot = format!("{}{}", column_letter(column), row);
                tr = tr.with_child(self.render_cell(derived, &slot, column, row));
            }
            table = table.with_child(tr);
        }

        let title = Element::new("div")
            .with_class("title")
            .with_frame(Rect::new(0.0, 0.0, width, self.theme.title_height))
            .with_text(self.title.clone());

        let root = Element::new("div")
            .with_class("patti-slip")
            .with_attr("xmlns", "http://www.w3.org/1999/xhtml")
            .with_frame(Rect::new(0.0, 0.0, width, height))
            .with_child(title)
            .with_child(table);

        SlipRegion {
            root,
            stylesheets: vec![self.stylesheet()],
            origin: self.origin.clone(),
            width,
            height,
            theme: self.theme.clone(),
        }
    }

    fn render_cell(&self, derived: &DerivedCells, slot: &str, column: usize, row: usize) -> Element {
        let frame = self.cell_frame(column, row);
        let td = Element::new("td").with_attr("data-slot", slot).with_frame(frame);

        if let Some((_, label)) = LABELS.iter().find(|(s, _)| *s == slot) {
            return td.with_class("label").with_text(*label);
        }

        let Some(cell) = CellId::from_slot(slot) else {
            return td;
        };
        let value = derived.get(cell);

        let mut td = td.with_class("value");
        if cell.is_numeric() {
            td = td.with_class("num");
        }
        if cell == CellId::Balance {
            if let Some(class) = derived.balance_class.css_class() {
                td = td.with_class(class);
            }
        }

        if EDITABLE.contains(&cell) {
            let input = Element::new("input")
                .with_attr("type", "text")
                .with_value(value)
                .with_frame(frame);
            td.with_child(input)
        } else if cell == CellId::Remarks {
            let textarea = Element::new("textarea").with_value(value).with_frame(frame);
            td.with_child(textarea)
        } else {
            td.with_text(value)
        }
    }

    fn stylesheet(&self) -> StyleSheet {
        let t = &self.theme;
        let base = format!(
            ".patti-slip {{ background: #ffffff; color: {}; font-family: {}; font-size: {}px; }}",
            t.text_color, t.font_family, t.font_size
        );
        let cells = format!(
            "td {{ border: 1px solid {}; width: {}px; height: {}px; padding: 0 4px; }}",
            t.border_color, t.column_width, t.row_height
        );
        let label = format!(".label {{ color: {}; font-weight: bold; }}", t.label_color);
        let pos = format!(".pos {{ color: {}; }}", t.excess_color);
        let neg = format!(".neg {{ color: {}; }}", t.shortage_color);
        StyleSheet {
            origin: None,
            rules: vec![
                base,
                cells,
                label,
                ".num { text-align: right; }".to_string(),
                pos,
                neg,
                ".title { font-weight: bold; text-align: center; }".to_string(),
            ],
        }
    }
}

fn column_letter(column: usize) -> char {
    (b'A' + column as u8) as char
}
