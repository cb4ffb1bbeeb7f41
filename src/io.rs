//! Reading BEAST/NEXUS posterior tree files and writing the annotated summary.
//!
//! BEAST writes one tree per line inside the `trees` block:
//! ```text
//! Begin trees;
//!     Translate
//!         1 'Homo sapiens',
//!         2 Pan,
//! ;
//! tree STATE_0 = [&R] ((1:1.0,2:1.0)[&rate=0.5]:1.0,...);
//! End;
//! ```
//! Files ending in `.gz` are read and written gzip-compressed.

use crate::error::{Result, SummaryError};
use crate::newick::{leaf_labels, parse_newick, parse_newick_translated, quote_label, to_newick};
use crate::source::PosteriorTreeSource;
use crate::tree::{TaxonSet, Tree};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Read, Write};
use std::path::{Path, PathBuf};

/// Which leading trees to discard.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Burnin {
    /// Drop the first N trees.
    Trees(usize),
    /// Keep trees with `STATE_ > s`; 0 keeps everything.
    States(usize),
    /// Drop this percentage of the trees in the file.
    Percent(f64),
}

impl Default for Burnin {
    fn default() -> Self {
        Burnin::Trees(0)
    }
}

impl Burnin {
    /// Builds the burn-in from the three mutually exclusive options; zero means unset.
    pub fn from_options(trees: usize, states: usize, percent: f64) -> Result<Self> {
        let set = [trees > 0, states > 0, percent > 0.0].iter().filter(|&&b| b).count();
        if set > 1 {
            return Err(SummaryError::Configuration(
                "burn-in may be given as trees, states or a percentage, not several".to_string(),
            ));
        }
        if !(0.0..100.0).contains(&percent) {
            return Err(SummaryError::Configuration(format!(
                "burn-in percentage must lie in [0, 100), got {percent}"
            )));
        }
        Ok(if states > 0 {
            Burnin::States(states)
        } else if percent > 0.0 {
            Burnin::Percent(percent)
        } else {
            Burnin::Trees(trees)
        })
    }

    /// Number of leading trees dropped from a file holding `file_trees` trees.
    fn skipped(self, file_trees: usize) -> usize {
        match self {
            Burnin::Trees(n) => n,
            Burnin::States(_) => 0,
            Burnin::Percent(p) => ((file_trees as f64) * p / 100.0).floor() as usize,
        }
    }
}

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".gz")
}

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gz(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_text(path: &Path) -> Result<String> {
    let mut text = String::new();
    open_reader(path)?.read_to_string(&mut text)?;
    Ok(text)
}

/// One `tree NAME = newick` line.
struct TreeBlock<'a> {
    header: &'a str,
    body: &'a str,
}

impl<'a> TreeBlock<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if !line.get(..5)?.eq_ignore_ascii_case("tree ") {
            return None;
        }
        let split = separator(line)?;
        Some(TreeBlock { header: line[..split].trim(), body: line[split + 1..].trim() })
    }
}

/// Byte offset of the first `=` outside `[...]` comments.
fn separator(line: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in line.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let digits: String = header[start + 6..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(state) = digits.parse::<usize>() {
            return state;
        }
    }
    0
}

#[derive(Clone, Debug, PartialEq)]
enum NexusToken {
    Word(String),
    Comma,
}

/// NEXUS tokens split at whitespace and unquoted commas; single-quoted words may contain both.
fn nexus_tokens(text: &str) -> Vec<NexusToken> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ',' {
            chars.next();
            tokens.push(NexusToken::Comma);
        } else if c == '\'' {
            chars.next();
            let mut token = String::new();
            while let Some(c) = chars.next() {
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        token.push('\'');
                        chars.next();
                        continue;
                    }
                    break;
                }
                token.push(c);
            }
            tokens.push(NexusToken::Word(token));
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == ',' {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(NexusToken::Word(token));
        }
    }
    tokens
}

/// Text between `keyword` and the next `;`, matched case-insensitively.
fn command_body<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let start = text.to_ascii_uppercase().find(keyword)? + keyword.len();
    let rest = &text[start..];
    Some(&rest[..rest.find(';').unwrap_or(rest.len())])
}

/// `TAXLABELS` of the taxa block, in file order.
fn parse_taxlabels(header: &str) -> Option<Vec<String>> {
    let labels: Vec<String> = nexus_tokens(command_body(header, "TAXLABELS")?)
        .into_iter()
        .filter_map(|t| match t {
            NexusToken::Word(w) => Some(w),
            NexusToken::Comma => None,
        })
        .collect();
    (!labels.is_empty()).then_some(labels)
}

/// `TRANSLATE` table mapping tree tokens to taxon labels.
fn parse_translate(header: &str) -> HashMap<String, String> {
    let Some(body) = command_body(header, "TRANSLATE") else {
        return HashMap::new();
    };
    nexus_tokens(body)
        .split(|t| *t == NexusToken::Comma)
        .filter_map(|entry| match entry {
            [NexusToken::Word(id), NexusToken::Word(label), ..] => Some((id.clone(), label.clone())),
            _ => None,
        })
        .collect()
}

/// Taxa and translation table shared by every tree of a file.
#[derive(Clone, Debug, Default)]
pub struct NexusHeader {
    pub taxa: TaxonSet,
    pub translate: HashMap<String, String>,
}

impl NexusHeader {
    /// Falls back to the sorted leaf labels of `first_tree` without a `TAXLABELS` block.
    fn parse(header: &str, first_tree: Option<&str>) -> Self {
        let translate = parse_translate(header);
        let taxa = match parse_taxlabels(header) {
            Some(labels) => TaxonSet::new(labels),
            None => {
                let labels = first_tree.map(leaf_labels).unwrap_or_default();
                TaxonSet::sorted(
                    labels
                        .into_iter()
                        .map(|l| translate.get(&l).cloned().unwrap_or(l))
                        .collect(),
                )
            }
        };
        NexusHeader { taxa, translate }
    }
}

/// Low-memory posterior: keeps only the current tree and re-reads the file on `reset`.
pub struct NexusTreeSource {
    path: PathBuf,
    header: NexusHeader,
    burnin: Burnin,
    file_trees: usize,
    skipped: usize,
    lines: Option<Lines<Box<dyn BufRead>>>,
    index: usize,
}

impl NexusTreeSource {
    /// Scans the file once for its header and tree count.
    pub fn open<P: AsRef<Path>>(path: P, burnin: Burnin) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut header_text = String::new();
        let mut first_tree: Option<String> = None;
        let mut file_trees = 0usize;
        for line in open_reader(&path)?.lines() {
            let line = line?;
            match TreeBlock::parse(&line) {
                Some(block) => {
                    if first_tree.is_none() {
                        first_tree = Some(block.body.to_string());
                    }
                    file_trees += 1;
                }
                None if first_tree.is_none() => {
                    header_text.push_str(&line);
                    header_text.push('\n');
                }
                None => {}
            }
        }
        if file_trees == 0 {
            tracing::warn!(path = %path.display(), "no trees found");
        }

        let header = NexusHeader::parse(&header_text, first_tree.as_deref());
        let skipped = burnin.skipped(file_trees).min(file_trees);
        tracing::info!(
            path = %path.display(),
            taxa = header.taxa.len(),
            trees = file_trees,
            burnin = skipped,
            "opened posterior tree file"
        );
        Ok(NexusTreeSource { path, header, burnin, file_trees, skipped, lines: None, index: 0 })
    }

    pub fn taxa(&self) -> &TaxonSet {
        &self.header.taxa
    }

    /// Trees in the file, before burn-in.
    pub fn file_trees(&self) -> usize {
        self.file_trees
    }

    fn keeps(&self, index: usize, state: usize) -> bool {
        match self.burnin {
            Burnin::States(s) => s == 0 || state > s,
            Burnin::Trees(_) | Burnin::Percent(_) => index >= self.skipped,
        }
    }
}

impl PosteriorTreeSource for NexusTreeSource {
    fn reset(&mut self) -> Result<()> {
        self.lines = Some(open_reader(&self.path)?.lines());
        self.index = 0;
        Ok(())
    }

    fn next_tree(&mut self) -> Result<Option<Cow<'_, Tree>>> {
        if self.lines.is_none() {
            self.reset()?;
        }
        loop {
            let Some(line) = self.lines.as_mut().and_then(|lines| lines.next()) else {
                return Ok(None);
            };
            let line = line?;
            let Some(block) = TreeBlock::parse(&line) else { continue };
            let index = self.index;
            self.index += 1;
            if !self.keeps(index, extract_state(block.header)) {
                continue;
            }
            let tree = parse_newick_translated(block.body, &self.header.taxa, &self.header.translate)
                .map_err(|e| SummaryError::Parse(format!("{} tree {}: {e}", self.path.display(), index)))?;
            return Ok(Some(Cow::Owned(tree)));
        }
    }

    fn approx_total_trees(&self) -> usize {
        self.file_trees - self.skipped
    }
}

/// Reads every post-burn-in tree into memory.
pub fn read_posterior_trees<P: AsRef<Path>>(path: P, burnin: Burnin) -> Result<(TaxonSet, Vec<Tree>)> {
    let mut source = NexusTreeSource::open(path, burnin)?;
    let mut trees = Vec::with_capacity(source.approx_total_trees());
    source.reset()?;
    while let Some(tree) = source.next_tree()? {
        trees.push(tree.into_owned());
    }
    Ok((source.header.taxa, trees))
}

/// Reads a user-supplied target tree (NEXUS or plain Newick) over the posterior's taxa.
pub fn read_target_tree<P: AsRef<Path>>(path: P, taxa: &TaxonSet) -> Result<Tree> {
    let path = path.as_ref();
    let text = read_text(path)?;
    if text.trim_start().get(..6).is_some_and(|s| s.eq_ignore_ascii_case("#NEXUS")) {
        let translate = parse_translate(&text);
        let block = text
            .lines()
            .find_map(TreeBlock::parse)
            .ok_or_else(|| SummaryError::Parse(format!("no tree found in {}", path.display())))?;
        return parse_newick_translated(block.body, taxa, &translate);
    }
    let newick = text.trim();
    if newick.is_empty() {
        return Err(SummaryError::Parse(format!("no tree found in {}", path.display())));
    }
    parse_newick(newick, taxa)
}

/// Renders the annotated tree as a NEXUS document.
pub fn format_nexus(tree: &Tree, taxa: &TaxonSet) -> String {
    let mut out = String::from("#NEXUS\n\nBegin taxa;\n");
    out.push_str(&format!("\tDimensions ntax={};\n\tTaxlabels\n", taxa.len()));
    for label in taxa.labels() {
        out.push_str(&format!("\t\t{}\n", quote_label(label)));
    }
    out.push_str("\t\t;\nEnd;\nBegin trees;\n");
    out.push_str(&format!("tree TREE1 = [&R] {}\n", to_newick(tree)));
    out.push_str("End;\n");
    out
}

/// Writes the annotated tree as NEXUS; a `.gz` path is gzip-compressed.
pub fn write_annotated_nexus<P: AsRef<Path>>(path: P, tree: &Tree, taxa: &TaxonSet) -> Result<()> {
    let p = path.as_ref();
    if p.as_os_str() == "-" {
        let mut out = std::io::stdout().lock();
        out.write_all(format_nexus(tree, taxa).as_bytes())?;
        out.flush()?;
        return Ok(());
    }

    let mut out: Box<dyn Write> = if is_gz(p) {
        let f = File::create(p)?;
        Box::new(BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };
    out.write_all(format_nexus(tree, taxa).as_bytes())?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MetaValue;
    use std::io::Write as _;

    const POSTERIOR: &str = "#NEXUS

Begin taxa;
\tDimensions ntax=3;
\tTaxlabels
\t\tA
\t\t'B b'
\t\tC
\t\t;
End;
Begin trees;
\tTranslate
\t\t1 A,
\t\t2 'B b',
\t\t3 C
;
tree STATE_0 = [&R] ((1:1,3:1):1,2:2);
tree STATE_1000 = [&R] ((1:1,2:1)[&rate=0.5]:1,3:2);
tree STATE_2000 = [&R] ((1:1.2,2:1.2)[&rate=0.7]:1,3:2.2);
tree STATE_3000 = [&R] ((2:0.8,1:0.8)[&rate=0.6]:1,3:1.8);
End;
";

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_header_and_translate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "run.trees", POSTERIOR);
        let (taxa, trees) = read_posterior_trees(&path, Burnin::default()).unwrap();
        assert_eq!(taxa.labels(), &["A", "B b", "C"]);
        assert_eq!(trees.len(), 4);
        let labels: Vec<&str> = trees[0].leaves().filter_map(|n| n.label.as_deref()).collect();
        assert_eq!(labels, vec!["A", "C", "B b"]);
        let ab = trees[1].node(trees[1].root()).children[0];
        assert_eq!(trees[1].node(ab).metadata["rate"], MetaValue::Number(0.5));
    }

    #[test]
    fn test_burnin_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "run.trees", POSTERIOR);
        let count = |burnin| read_posterior_trees(&path, burnin).unwrap().1.len();
        assert_eq!(count(Burnin::Trees(1)), 3);
        assert_eq!(count(Burnin::States(1000)), 2);
        assert_eq!(count(Burnin::Percent(25.0)), 3);
        assert_eq!(count(Burnin::Percent(60.0)), 2);
        assert_eq!(count(Burnin::Trees(10)), 0);
    }

    #[test]
    fn test_streaming_source_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "run.trees", POSTERIOR);
        let mut source = NexusTreeSource::open(&path, Burnin::Trees(1)).unwrap();
        assert_eq!(source.file_trees(), 4);
        assert_eq!(source.approx_total_trees(), 3);
        assert!(source.as_slice().is_none());

        for _ in 0..2 {
            source.reset().unwrap();
            let mut n = 0;
            while source.next_tree().unwrap().is_some() {
                n += 1;
            }
            assert_eq!(n, 3);
        }
    }

    #[test]
    fn test_gzip_input_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trees.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(POSTERIOR.as_bytes()).unwrap();
        enc.finish().unwrap();

        let (taxa, trees) = read_posterior_trees(&path, Burnin::default()).unwrap();
        assert_eq!(trees.len(), 4);

        let out = dir.path().join("summary.tree.gz");
        write_annotated_nexus(&out, &trees[1], &taxa).unwrap();
        let text = read_text(&out).unwrap();
        assert!(text.starts_with("#NEXUS"));
        assert!(text.contains("'B b'"));
    }

    #[test]
    fn test_written_nexus_reads_back_as_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "run.trees", POSTERIOR);
        let (taxa, trees) = read_posterior_trees(&path, Burnin::default()).unwrap();

        let out = dir.path().join("summary.tree");
        write_annotated_nexus(&out, &trees[1], &taxa).unwrap();
        let target = read_target_tree(&out, &taxa).unwrap();
        assert_eq!(to_newick(&target), to_newick(&trees[1]));
    }

    #[test]
    fn test_plain_newick_target_and_missing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let taxa = TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()]);
        let path = write_file(&dir, "target.nwk", "((A:1,B:1):1,C:2);\n");
        let target = read_target_tree(&path, &taxa).unwrap();
        assert_eq!(target.len(), 5);

        let empty = write_file(&dir, "empty.nwk", "\n");
        assert!(matches!(read_target_tree(&empty, &taxa), Err(SummaryError::Parse(_))));
    }

    #[test]
    fn test_taxa_from_first_tree_without_taxlabels() {
        let dir = tempfile::tempdir().unwrap();
        let content = "#NEXUS\nBegin trees;\ntree STATE_0 = ((C:1,A:1):1,B:2);\nEnd;\n";
        let path = write_file(&dir, "bare.trees", content);
        let (taxa, trees) = read_posterior_trees(&path, Burnin::default()).unwrap();
        assert_eq!(taxa.labels(), &["A", "B", "C"]);
        assert_eq!(trees.len(), 1);
    }

    #[test]
    fn test_burnin_options() {
        assert_eq!(Burnin::from_options(0, 0, 0.0).unwrap(), Burnin::Trees(0));
        assert_eq!(Burnin::from_options(0, 500, 0.0).unwrap(), Burnin::States(500));
        assert_eq!(Burnin::from_options(0, 0, 10.0).unwrap(), Burnin::Percent(10.0));
        assert!(Burnin::from_options(5, 500, 0.0).is_err());
        assert!(Burnin::from_options(0, 0, 100.0).is_err());
    }

    #[test]
    fn test_tree_comment_before_separator() {
        let dir = tempfile::tempdir().unwrap();
        let content = "#NEXUS\nBegin trees;\n\tTranslate\n\t\t1 A,\n\t\t2 B,\n\t\t3 C\n;\n\
            tree STATE_0 [&lnP=-1234.5] = [&R] ((1:1,2:1):1,3:2);\n\
            tree STATE_1000 [&lnP=-1230.1,joint=-1300] = [&R] ((1:1,3:1)[&rate=0.5]:1,2:2);\n\
            End;\n";
        let path = write_file(&dir, "lnp.trees", content);

        let (taxa, trees) = read_posterior_trees(&path, Burnin::States(500)).unwrap();
        assert_eq!(taxa.labels(), &["A", "B", "C"]);
        assert_eq!(trees.len(), 1);
        let ac = trees[0].node(trees[0].root()).children[0];
        assert_eq!(trees[0].node(ac).metadata["rate"], MetaValue::Number(0.5));

        let mut source = NexusTreeSource::open(&path, Burnin::default()).unwrap();
        assert_eq!(source.file_trees(), 2);
        source.reset().unwrap();
        let mut n = 0;
        while source.next_tree().unwrap().is_some() {
            n += 1;
        }
        assert_eq!(n, 2);
    }

    #[test]
    fn test_separator_skips_comments() {
        assert_eq!(separator("tree T = (A,B);"), Some(7));
        assert_eq!(separator("tree T [&lnP=-1.5] = (A,B);"), Some(19));
        assert_eq!(separator("tree T [&lnP=-1.5]"), None);
    }

    #[test]
    fn test_translate_label_with_comma() {
        let header = "Begin trees;\n\tTranslate\n\t\t1 'A, strain 2',\n\t\t2 'it''s B',\n\t\t3 C\n;\n";
        let translate = parse_translate(header);
        assert_eq!(translate.len(), 3);
        assert_eq!(translate["1"], "A, strain 2");
        assert_eq!(translate["2"], "it's B");
        assert_eq!(translate["3"], "C");
    }

    #[test]
    fn test_extract_state() {
        assert_eq!(extract_state("tree STATE_12345"), 12345);
        assert_eq!(extract_state("tree TREE1"), 0);
    }
}
