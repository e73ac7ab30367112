//! Accessibility tree compression.
//!
//! Devices report their screen as a nested tree whose exact shape depends on
//! the dump source: children may live under different keys, booleans may be
//! strings, and most fields are optional. [`compress`] walks any of these
//! shapes and keeps only the nodes a user could see and act on, numbered in
//! pre-order. Those numbers are the only handles the oracle is given.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest label kept per element, in characters.
pub const TEXT_LIMIT: usize = 80;

pub const DEFAULT_CHILD_KEYS: &[&str] = &["children", "nodes", "childNodes", "child"];

const CLASS_KEYS: &[&str] = &["class", "className", "class_name"];
const TEXT_KEYS: &[&str] = &["text"];
const DESCRIPTION_KEYS: &[&str] = &["content-desc", "contentDescription", "content_desc", "desc"];
const VISIBLE_KEYS: &[&str] = &["visible", "visibleToUser", "visible-to-user"];
const DEFAULT_CLASS: &str = "View";

/// Pixel rectangle with a precomputed center. Always has positive area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub center_x: i32,
    pub center_y: i32,
}

impl Bounds {
    /// `None` for zero or negative area.
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Option<Self> {
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            left,
            top,
            right,
            bottom,
            center_x: midpoint(left, right),
            center_y: midpoint(top, bottom),
        })
    }

    /// Parse `"[left,top][right,bottom]"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
        let (first, second) = inner.split_once("][")?;
        let (left, top) = parse_pair(first)?;
        let (right, bottom) = parse_pair(second)?;
        Self::new(left, top, right, bottom)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(raw) => Self::parse(raw),
            Value::Object(fields) => Self::new(
                coordinate(fields.get("left")?)?,
                coordinate(fields.get("top")?)?,
                coordinate(fields.get("right")?)?,
                coordinate(fields.get("bottom")?)?,
            ),
            _ => None,
        }
    }
}

fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

fn parse_pair(raw: &str) -> Option<(i32, i32)> {
    let (a, b) = raw.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

fn coordinate(value: &Value) -> Option<i32> {
    if let Some(n) = value.as_i64() {
        return i32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= f64::from(i32::MIN) && f <= f64::from(i32::MAX) {
        Some(f.round() as i32)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementFlags {
    pub clickable: bool,
    pub editable: bool,
    pub scrollable: bool,
    /// Present only when the node reports a checked state.
    pub checked: Option<bool>,
}

impl ElementFlags {
    pub fn is_actionable(&self) -> bool {
        self.clickable || self.editable || self.scrollable
    }

    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.clickable {
            labels.push("clickable");
        }
        if self.editable {
            labels.push("editable");
        }
        if self.scrollable {
            labels.push("scrollable");
        }
        match self.checked {
            Some(true) => labels.push("checked"),
            Some(false) => labels.push("unchecked"),
            None => {}
        }
        labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    pub index: usize,
    pub element_class: String,
    pub text: String,
    pub bounds: Bounds,
    pub flags: ElementFlags,
}

impl UiElement {
    /// `[index] Class "text" [cx,cy] flag,flag`. Quotes and backslashes in
    /// the text are escaped.
    pub fn render(&self) -> String {
        let text = self.text.replace('\\', "\\\\").replace('"', "\\\"");
        let mut line = format!(
            "[{}] {} \"{}\" [{},{}]",
            self.index, self.element_class, text, self.bounds.center_x, self.bounds.center_y
        );
        let labels = self.flags.labels();
        if !labels.is_empty() {
            line.push(' ');
            line.push_str(&labels.join(","));
        }
        line
    }
}

/// One compressed observation of the screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    pub elements: Vec<UiElement>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressOptions {
    /// Keys that may hold a node's children, checked in order.
    pub child_keys: Vec<String>,
    pub text_limit: usize,
    /// Stop after this many kept elements. `None` keeps everything.
    pub max_elements: Option<usize>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            child_keys: DEFAULT_CHILD_KEYS.iter().map(|k| k.to_string()).collect(),
            text_limit: TEXT_LIMIT,
            max_elements: None,
        }
    }
}

pub fn compress(raw: &Value) -> Snapshot {
    compress_with(raw, &CompressOptions::default())
}

/// Depth-first, pre-order walk over `raw`, which may be a single root node or
/// an array of roots.
pub fn compress_with(raw: &Value, options: &CompressOptions) -> Snapshot {
    let mut elements: Vec<UiElement> = Vec::new();
    let mut stack: Vec<&Value> = vec![raw];

    while let Some(node) = stack.pop() {
        if options.max_elements.is_some_and(|max| elements.len() >= max) {
            break;
        }
        let fields = match node {
            Value::Array(items) => {
                stack.extend(items.iter().rev());
                continue;
            }
            Value::Object(fields) => fields,
            _ => continue,
        };

        if let Some(element) = read_element(fields, elements.len(), options) {
            elements.push(element);
        }

        for key in options.child_keys.iter().rev() {
            match fields.get(key) {
                Some(Value::Array(children)) => stack.extend(children.iter().rev()),
                Some(child @ Value::Object(_)) => stack.push(child),
                _ => {}
            }
        }
    }

    let text = elements
        .iter()
        .map(UiElement::render)
        .collect::<Vec<_>>()
        .join("\n");
    Snapshot { text, elements }
}

fn read_element(fields: &Map<String, Value>, index: usize, options: &CompressOptions) -> Option<UiElement> {
    if !flag(fields, VISIBLE_KEYS).unwrap_or(true) || !flag(fields, &["enabled"]).unwrap_or(true) {
        return None;
    }

    let element_class = short_class(string_field(fields, CLASS_KEYS));
    let text = label(fields, options.text_limit);
    let flags = ElementFlags {
        clickable: flag(fields, &["clickable"]).unwrap_or(false),
        editable: flag(fields, &["editable"]).unwrap_or(false) || element_class.ends_with("EditText"),
        scrollable: flag(fields, &["scrollable"]).unwrap_or(false),
        checked: flag(fields, &["checked"]),
    };
    if text.is_empty() && !flags.is_actionable() {
        return None;
    }

    let bounds = fields.get("bounds").and_then(Bounds::from_value)?;
    Some(UiElement {
        index,
        element_class,
        text,
        bounds,
        flags,
    })
}

fn string_field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| fields.get(*key).and_then(Value::as_str))
}

/// Booleans arrive either as JSON bools or as `"true"`/`"false"` strings.
fn flag(fields: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    })
}

fn short_class(class_name: Option<&str>) -> String {
    class_name
        .and_then(|name| name.trim().rsplit('.').next())
        .filter(|short| !short.is_empty())
        .unwrap_or(DEFAULT_CLASS)
        .to_string()
}

/// Visible text, falling back to the accessibility description.
fn label(fields: &Map<String, Value>, limit: usize) -> String {
    TEXT_KEYS
        .iter()
        .chain(DESCRIPTION_KEYS)
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
        .map(|text| text.chars().take(limit).collect())
        .unwrap_or_default()
}
