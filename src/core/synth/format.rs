use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::error::LmcpResult;
use crate::core::template::OverlayValue;

/// Nested document built from dotted keys; maps are `BTreeMap`, so every
/// rendering is sorted and byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Leaf(OverlayValue),
    List(Vec<OverlayValue>),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    pub fn branch() -> Self {
        Node::Branch(BTreeMap::new())
    }

    /// Build a tree from flat `a.b.c = v` entries.
    pub fn from_dotted(entries: &BTreeMap<String, OverlayValue>) -> Self {
        let mut root = Node::branch();
        for (key, value) in entries {
            root.insert_dotted(key, Node::Leaf(value.clone()));
        }
        root
    }

    /// Insert at a dotted path, replacing any leaf in the way.
    pub fn insert_dotted(&mut self, path: &str, value: Node) {
        let mut parts = path.split('.').peekable();
        let mut current = self;
        while let Some(part) = parts.next() {
            if !matches!(current, Node::Branch(_)) {
                *current = Node::branch();
            }
            let Node::Branch(children) = current else {
                return;
            };
            if parts.peek().is_none() {
                children.insert(part.to_string(), value);
                return;
            }
            current = children.entry(part.to_string()).or_insert_with(Node::branch);
        }
    }

    /// Insert a direct child without splitting `key` on dots.
    pub fn insert_child(&mut self, key: &str, value: Node) {
        if let Node::Branch(children) = self {
            children.insert(key.to_string(), value);
        }
    }

    pub fn to_toml(&self) -> LmcpResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn to_yaml(&self) -> LmcpResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ── .properties ─────────────────────────────────────────

const PROPERTIES_HEADER: &str = "#Minecraft server properties\n#Generated by lmcp\n";

fn escape_property(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\:"),
            '=' => out.push_str("\\="),
            other => out.push(other),
        }
    }
    out
}

fn unescape_property(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Sorted `key=value` lines under a fixed header (no timestamp).
pub fn render_properties(entries: &BTreeMap<String, OverlayValue>) -> String {
    let mut out = String::from(PROPERTIES_HEADER);
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&escape_property(&value.to_string()));
        out.push('\n');
    }
    out
}

/// Parse a `.properties` file into raw strings. Comment and blank lines are
/// skipped; `:` is accepted as separator like Java's `Properties`.
pub fn parse_properties(raw: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line
            .char_indices()
            .scan(false, |escaped, (idx, c)| {
                let hit = !*escaped && (c == '=' || c == ':');
                *escaped = !*escaped && c == '\\';
                Some((idx, hit))
            })
            .find(|(_, hit)| *hit)
            .map(|(idx, _)| idx);
        let (key, value) = match split {
            Some(idx) => (&line[..idx], &line[idx + 1..]),
            None => (line, ""),
        };
        entries.insert(unescape_property(key.trim()), unescape_property(value.trim()));
    }
    entries
}

// ── Flattening for extraction ───────────────────────────

/// Flatten a TOML document into dotted keys. Arrays are skipped.
pub fn flatten_toml(raw: &str) -> LmcpResult<BTreeMap<String, OverlayValue>> {
    let table: toml::Table = toml::from_str(raw)?;
    let mut out = BTreeMap::new();
    flatten_toml_table("", &table, &mut out);
    Ok(out)
}

fn flatten_toml_table(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, OverlayValue>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_toml_table(&path, inner, out),
            toml::Value::String(s) => {
                out.insert(path, OverlayValue::String(s.clone()));
            }
            toml::Value::Integer(i) => {
                out.insert(path, OverlayValue::Integer(*i));
            }
            toml::Value::Float(f) => {
                out.insert(path, OverlayValue::Float(*f));
            }
            toml::Value::Boolean(b) => {
                out.insert(path, OverlayValue::Bool(*b));
            }
            toml::Value::Datetime(d) => {
                out.insert(path, OverlayValue::String(d.to_string()));
            }
            toml::Value::Array(_) => {}
        }
    }
}
