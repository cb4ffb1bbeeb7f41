//! BEAST-flavoured Newick reading and writing.
//!
//! BEAST writes per-node metadata as comments of the form `[&key=value,...]`,
//! either right after the node label or between `:` and the branch length:
//! ```text
//! ((A[&rate=0.5]:1.0,B:[&rate=0.7]1.0)[&location="X"]:0.5,C:1.5);
//! ```
//! Values are numbers, `true`/`false`, quoted strings or `{...}` arrays.
//! Comments that do not start with `&` are ignored.

use crate::error::{Result, SummaryError};
use crate::tree::{MetaValue, NodeId, TaxonSet, Tree, TreeBuilder};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Parse one Newick tree whose leaf labels are taxon labels.
pub fn parse_newick(newick: &str, taxa: &TaxonSet) -> Result<Tree> {
    parse_newick_translated(newick, taxa, &HashMap::new())
}

/// Parse one Newick tree, mapping leaf labels through a NEXUS `TRANSLATE` table first.
pub fn parse_newick_translated(
    newick: &str,
    taxa: &TaxonSet,
    translate: &HashMap<String, String>,
) -> Result<Tree> {
    let mut parser = NewickParser {
        src: newick,
        pos: 0,
        builder: Tree::builder(taxa.len()),
        taxa,
        translate,
    };
    parser.skip_whitespace_and_comments();
    let root = parser.parse_node(None)?;
    parser.skip_whitespace();
    match parser.peek() {
        Some(b';') | None => {}
        Some(c) => return Err(parser.error(&format!("unexpected '{}' after tree", c as char))),
    }
    parser.builder.build(root)
}

/// Collect the leaf labels of a Newick string without building a tree.
///
/// Used to derive a taxon set when a file carries no `TAXLABELS` block.
pub fn leaf_labels(newick: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let bytes = newick.as_bytes();
    let mut pos = 0;
    let mut after_open_or_comma = true;
    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                while pos < bytes.len() && bytes[pos] != b']' {
                    pos += 1;
                }
            }
            b'(' | b',' => after_open_or_comma = true,
            b' ' | b'\t' | b'\n' | b'\r' => {}
            _ if after_open_or_comma => {
                let (label, end) = read_label(newick, pos);
                if !label.is_empty() {
                    labels.push(label);
                }
                pos = end;
                after_open_or_comma = false;
                continue;
            }
            _ => after_open_or_comma = false,
        }
        pos += 1;
    }
    labels
}

struct NewickParser<'a> {
    src: &'a str,
    pos: usize,
    builder: TreeBuilder,
    taxa: &'a TaxonSet,
    translate: &'a HashMap<String, String>,
}

impl NewickParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error(&self, message: &str) -> SummaryError {
        SummaryError::Parse(format!("{message} at byte {}", self.pos))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// Skips a leading `[&R]`-style rooting comment and friends.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'[') {
                return;
            }
            while let Some(c) = self.bump() {
                if c == b']' {
                    break;
                }
            }
        }
    }

    fn parse_node(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.builder.add_node(parent, 0.0);

        if self.peek() == Some(b'(') {
            self.bump();
            loop {
                self.parse_node(Some(id))?;
                self.skip_whitespace();
                match self.bump() {
                    Some(b',') => continue,
                    Some(b')') => break,
                    _ => return Err(self.error("expected ',' or ')'")),
                }
            }
            let (label, end) = read_label(self.src, self.pos);
            self.pos = end;
            if !label.is_empty() {
                self.builder.set_label(id, label);
            }
        } else {
            let (label, end) = read_label(self.src, self.pos);
            self.pos = end;
            if label.is_empty() {
                return Err(self.error("leaf without a label"));
            }
            let name = self.translate.get(&label).cloned().unwrap_or(label);
            let taxon = self.taxa.require(&name)?;
            self.builder.set_taxon(id, taxon, name);
        }

        self.parse_node_suffix(id)?;
        Ok(id)
    }

    /// Annotations and branch length, in any BEAST-produced order.
    fn parse_node_suffix(&mut self, id: NodeId) -> Result<()> {
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'[') => self.parse_comment(id)?,
                Some(b':') => {
                    self.bump();
                    self.skip_whitespace();
                    while self.peek() == Some(b'[') {
                        self.parse_comment(id)?;
                        self.skip_whitespace();
                    }
                    let start = self.pos;
                    while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E')) {
                        self.pos += 1;
                    }
                    let length: f64 = self.src[start..self.pos]
                        .parse()
                        .map_err(|_| self.error("invalid branch length"))?;
                    self.builder.set_branch_length(id, length);
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_comment(&mut self, id: NodeId) -> Result<()> {
        self.bump(); // '['
        if self.peek() != Some(b'&') {
            while let Some(c) = self.bump() {
                if c == b']' {
                    return Ok(());
                }
            }
            return Err(self.error("unterminated comment"));
        }
        self.bump(); // '&'

        loop {
            self.skip_whitespace();
            let start = self.pos;
            while !matches!(self.peek(), Some(b'=' | b',' | b']') | None) {
                self.pos += 1;
            }
            let key = self.src[start..self.pos].trim().to_string();
            match self.bump() {
                Some(b'=') => {
                    let value = self.parse_value()?;
                    if !key.is_empty() {
                        self.builder.insert_metadata(id, key, value);
                    }
                    self.skip_whitespace();
                    match self.bump() {
                        Some(b',') => continue,
                        Some(b']') => return Ok(()),
                        _ => return Err(self.error("expected ',' or ']' in annotation")),
                    }
                }
                // Flag-style entries without a value carry no data.
                Some(b',') => continue,
                Some(b']') => return Ok(()),
                _ => return Err(self.error("unterminated annotation")),
            }
        }
    }

    fn parse_value(&mut self) -> Result<MetaValue> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'{') => {
                self.bump();
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    if self.peek() == Some(b'}') {
                        self.bump();
                        break;
                    }
                    items.push(self.parse_value()?);
                    self.skip_whitespace();
                    match self.bump() {
                        Some(b',') => continue,
                        Some(b'}') => break,
                        _ => return Err(self.error("expected ',' or '}' in array")),
                    }
                }
                Ok(MetaValue::Array(items))
            }
            Some(q @ (b'"' | b'\'')) => {
                self.bump();
                let mut text = String::new();
                let mut start = self.pos;
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated string")),
                        Some(c) if c == q => {
                            text.push_str(&self.src[start..self.pos - 1]);
                            // doubled quote is a literal quote
                            if self.peek() != Some(q) {
                                break;
                            }
                            self.bump();
                            start = self.pos - 1;
                        }
                        Some(_) => {}
                    }
                }
                Ok(MetaValue::Text(text))
            }
            _ => {
                let start = self.pos;
                while !matches!(self.peek(), Some(b',' | b']' | b'}') | None) {
                    self.pos += 1;
                }
                Ok(classify_token(self.src[start..self.pos].trim()))
            }
        }
    }
}

fn classify_token(token: &str) -> MetaValue {
    match token {
        "true" | "TRUE" => MetaValue::Bool(true),
        "false" | "FALSE" => MetaValue::Bool(false),
        _ => match token.parse::<f64>() {
            Ok(x) => MetaValue::Number(x),
            Err(_) => MetaValue::Text(token.to_string()),
        },
    }
}

/// Reads a quoted or unquoted label starting at `pos`; returns it and the end position.
fn read_label(src: &str, pos: usize) -> (String, usize) {
    let bytes = src.as_bytes();
    let mut pos = pos;
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    if pos < bytes.len() && bytes[pos] == b'\'' {
        let mut label = String::new();
        let mut i = pos + 1;
        let mut start = i;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                label.push_str(&src[start..i]);
                // '' is an escaped quote
                if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    label.push('\'');
                    i += 2;
                    start = i;
                    continue;
                }
                return (label, i + 1);
            }
            i += 1;
        }
        label.push_str(&src[start..]);
        return (label, bytes.len());
    }
    let start = pos;
    while pos < bytes.len() && !matches!(bytes[pos], b'(' | b')' | b',' | b':' | b';' | b'[' | b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    (src[start..pos].to_string(), pos)
}

/// Serialize a tree as BEAST-annotated Newick (terminated by `;`).
///
/// Metadata keys are written in sorted order. Filtered nodes keep only their
/// `posterior` annotation.
pub fn to_newick(tree: &Tree) -> String {
    let mut out = String::new();
    write_node(tree, tree.root(), &mut out);
    out.push(';');
    out
}

fn write_node(tree: &Tree, id: NodeId, out: &mut String) {
    let node = tree.node(id);
    if !node.children.is_empty() {
        out.push('(');
        for (k, &child) in node.children.iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            write_node(tree, child, out);
        }
        out.push(')');
    }
    if let Some(label) = &node.label {
        out.push_str(&quote_label(label));
    }

    let entries: Vec<(&String, &MetaValue)> = node
        .metadata
        .iter()
        .filter(|(k, _)| !node.filtered || k.as_str() == "posterior")
        .collect();
    if !entries.is_empty() {
        out.push_str("[&");
        for (k, (key, value)) in entries.into_iter().enumerate() {
            if k > 0 {
                out.push(',');
            }
            let _ = write!(out, "{key}=");
            write_value(value, out);
        }
        out.push(']');
    }

    if let Some(length) = tree.branch_length(id) {
        let _ = write!(out, ":{length}");
    }
}

fn write_value(value: &MetaValue, out: &mut String) {
    match value {
        MetaValue::Number(x) => {
            let _ = write!(out, "{x}");
        }
        MetaValue::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        MetaValue::Text(s) => {
            let _ = write!(out, "\"{}\"", s.replace('"', "\"\""));
        }
        MetaValue::Array(items) => {
            out.push('{');
            for (k, item) in items.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

pub(crate) fn quote_label(label: &str) -> String {
    let needs_quotes = label
        .chars()
        .any(|c| c.is_whitespace() || "()[]:;,'".contains(c));
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> TaxonSet {
        TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()])
    }

    #[test]
    fn test_parse_plain_tree() {
        let tree = parse_newick("((A:1.0,B:1.0):2.0,C:3.0);", &abc()).unwrap();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.height(tree.root()), 3.0);
        let ab = tree.node(tree.root()).children[0];
        assert_eq!(tree.height(ab), 1.0);
        assert_eq!(tree.node(ab).children.len(), 2);
    }

    #[test]
    fn test_parse_beast_annotations() {
        let newick = "[&R] ((A[&rate=0.5]:1.0,B:[&rate=0.7,flag=true]1.0)[&location=\"X\",loc={1.5,-2}]:2.0,C:3.0);";
        let tree = parse_newick(newick, &abc()).unwrap();
        let ab = tree.node(tree.root()).children[0];
        let a = tree.node(ab).children[0];
        let b = tree.node(ab).children[1];

        assert_eq!(tree.node(a).metadata["rate"], MetaValue::Number(0.5));
        assert_eq!(tree.node(b).metadata["rate"], MetaValue::Number(0.7));
        assert_eq!(tree.node(b).metadata["flag"], MetaValue::Bool(true));
        assert_eq!(tree.node(ab).metadata["location"], MetaValue::Text("X".into()));
        assert_eq!(tree.node(ab).metadata["loc"], MetaValue::numbers(&[1.5, -2.0]));
        assert_eq!(tree.branch_length(b), Some(1.0));
    }

    #[test]
    fn test_translate_table() {
        let translate: HashMap<String, String> = [("1", "A"), ("2", "B"), ("3", "C")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let tree = parse_newick_translated("((1:1,3:1):1,2:2);", &abc(), &translate).unwrap();
        let taxa: Vec<usize> = tree.leaves().filter_map(|n| n.taxon).collect();
        assert_eq!(taxa, vec![0, 2, 1]);
    }

    #[test]
    fn test_unknown_taxon_is_error() {
        let err = parse_newick("((A:1,Z:1):1,C:2);", &abc()).unwrap_err();
        assert!(matches!(err, SummaryError::UnknownTaxon(t) if t == "Z"));
    }

    #[test]
    fn test_quoted_labels() {
        let taxa = TaxonSet::sorted(vec!["Homo sapiens".into(), "O'Neil".into()]);
        let tree = parse_newick("('Homo sapiens':1,'O''Neil':1);", &taxa).unwrap();
        let written = to_newick(&tree);
        assert_eq!(written, "('Homo sapiens':1,'O''Neil':1);");
    }

    #[test]
    fn test_leaf_labels() {
        let labels = leaf_labels("((A[&x=1]:1,'B c':1):1,C:2);");
        assert_eq!(labels, vec!["A", "B c", "C"]);
    }

    #[test]
    fn test_write_annotations_sorted_and_filtered() {
        let mut tree = parse_newick("((A:1,B:1):1,C:2);", &abc()).unwrap();
        let ab = tree.node(tree.root()).children[0];
        let node = tree.node_mut(ab);
        node.metadata.insert("posterior".into(), MetaValue::Number(0.75));
        node.metadata.insert("height_95%_HPD".into(), MetaValue::numbers(&[0.8, 1.2]));
        node.metadata.insert("location".into(), MetaValue::Text("X".into()));
        assert_eq!(
            to_newick(&tree),
            "((A:1,B:1)[&height_95%_HPD={0.8,1.2},location=\"X\",posterior=0.75]:1,C:2);"
        );

        tree.node_mut(ab).filtered = true;
        assert_eq!(to_newick(&tree), "((A:1,B:1)[&posterior=0.75]:1,C:2);");
    }

    #[test]
    fn test_text_with_quotes_reads_back() {
        let mut tree = parse_newick("((A:1,B:1):1,C:2);", &abc()).unwrap();
        let ab = tree.node(tree.root()).children[0];
        tree.node_mut(ab)
            .metadata
            .insert("host".into(), MetaValue::Text("say \"hi\"".into()));
        let written = to_newick(&tree);
        assert_eq!(written, "((A:1,B:1)[&host=\"say \"\"hi\"\"\"]:1,C:2);");

        let back = parse_newick(&written, &abc()).unwrap();
        let ab = back.node(back.root()).children[0];
        assert_eq!(back.node(ab).metadata["host"], MetaValue::Text("say \"hi\"".into()));
    }
}
