use rust_python_tree_annotator::bitset::Bitset;
use rust_python_tree_annotator::config::{HeightSummary, SummaryConfig, TargetTopology};
use rust_python_tree_annotator::contour::KdeContourEstimator;
use rust_python_tree_annotator::error::SummaryError;
use rust_python_tree_annotator::io::{Burnin, NexusTreeSource, format_nexus, read_posterior_trees};
use rust_python_tree_annotator::newick::{parse_newick, to_newick};
use rust_python_tree_annotator::registry::CladeRegistry;
use rust_python_tree_annotator::selector::SummaryTreeSelector;
use rust_python_tree_annotator::snapshot::CladeCodec;
use rust_python_tree_annotator::source::InMemoryTreeSource;
use rust_python_tree_annotator::summary::summarize;
use rust_python_tree_annotator::tree::{MetaValue, TaxonSet, Tree};
use std::io::Write;

fn abc() -> TaxonSet {
    TaxonSet::sorted(vec!["A".into(), "B".into(), "C".into()])
}

fn trees(newicks: &[&str]) -> Vec<Tree> {
    newicks.iter().map(|s| parse_newick(s, &abc()).unwrap()).collect()
}

/// `((A,B),C)` three times, `((A,C),B)` once.
fn scenario_a() -> Vec<Tree> {
    trees(&[
        "((A:1,B:1)[&location=X,loc={0.1,0.2}]:1,C:2);",
        "((A:1.2,B:1.2)[&location=X,loc={0.4,0.1}]:1,C:2.2);",
        "((A:1,C:1)[&location=Y,loc={0.9,0.9}]:1,B:2);",
        "((B:0.8,A:0.8)[&location=Y,loc={0.2,0.5}]:1,C:1.8);",
    ])
}

fn clade(taxa: &[usize]) -> Bitset {
    let mut bits = Bitset::zeros(Bitset::words_for_taxa(3));
    for &t in taxa {
        bits.set_taxon(t);
    }
    bits
}

fn ab_node(tree: &Tree) -> usize {
    tree.nodes().iter().find(|n| n.taxon == Some(0)).and_then(|n| n.parent).unwrap()
}

#[test]
fn scenario_a_credibilities_and_mcc_tree() {
    let posterior = scenario_a();
    let mut registry = CladeRegistry::new(CladeCodec::new(3, true), false);
    for tree in &posterior {
        registry.add(tree, false).unwrap();
    }
    registry.calculate_credibilities(posterior.len()).unwrap();
    assert_eq!(registry.credibility(&clade(&[0, 1])), Some(0.75));
    assert_eq!(registry.credibility(&clade(&[0, 2])), Some(0.25));

    let mut source = InMemoryTreeSource::new(posterior);
    let selected =
        SummaryTreeSelector::select(&mut source, TargetTopology::MaxCladeCredibility, true).unwrap();
    assert_eq!(selected.index, 0);
    let ab = ab_node(&selected.tree);
    let leaves: Vec<usize> = selected.tree.node(ab).children.iter().filter_map(|&c| selected.tree.node(c).taxon).collect();
    assert_eq!(leaves, vec![0, 1]);
}

#[test]
fn scenario_b_mean_height() {
    let mut source = InMemoryTreeSource::new(scenario_a());
    let config = SummaryConfig { heights: HeightSummary::Mean, ..Default::default() };
    let tree = summarize(&mut source, &config, None, &KdeContourEstimator::default()).unwrap();

    let ab = ab_node(&tree);
    assert!((tree.height(ab) - 1.0).abs() < 1e-9);
    assert_eq!(tree.node(ab).metadata["posterior"], MetaValue::Number(0.75));
}

#[test]
fn scenario_c_discrete_mode() {
    let mut source = InMemoryTreeSource::new(scenario_a());
    let tree = summarize(&mut source, &SummaryConfig::default(), None, &KdeContourEstimator::default()).unwrap();

    // {A,B} samples: X, X, Y
    let meta = &tree.node(ab_node(&tree)).metadata;
    assert_eq!(meta["location"], MetaValue::Text("X".into()));
    assert!((meta["location.prob"].as_number().unwrap() - 2.0 / 3.0).abs() < 1e-12);
}

#[test]
fn scenario_d_tied_mode() {
    let mut source = InMemoryTreeSource::new(trees(&[
        "((A:1,B:1)[&location=X]:1,C:2);",
        "((A:1,B:1)[&location=X]:1,C:2);",
        "((A:1,B:1)[&location=Y]:1,C:2);",
        "((A:1,B:1)[&location=Y]:1,C:2);",
    ]));
    let tree = summarize(&mut source, &SummaryConfig::default(), None, &KdeContourEstimator::default()).unwrap();

    let meta = &tree.node(ab_node(&tree)).metadata;
    assert_eq!(meta["location"], MetaValue::Text("X+Y".into()));
    assert_eq!(meta["location.prob"], MetaValue::Number(1.0));
}

#[test]
fn scenario_e_ca_heights_with_sampled_ancestors_rejected() {
    // trunk above the root, A sampled as a direct ancestor
    let posterior = trees(&["(((A:0,B:1):1,C:2):1);", "(((A:0,B:1.5):1,C:2.5):1);"]);
    assert!(posterior[0].has_trunk());
    assert!(posterior[0].is_fake(ab_node(&posterior[0])));

    let mut source = InMemoryTreeSource::new(posterior);
    let config = SummaryConfig { heights: HeightSummary::CommonAncestor, ..Default::default() };
    let err = summarize(&mut source, &config, None, &KdeContourEstimator::default()).unwrap_err();
    assert!(matches!(err, SummaryError::Configuration(_)));
}

#[test]
fn trunk_root_posterior_is_one() {
    let mut source = InMemoryTreeSource::new(trees(&[
        "(((A:1,B:1):1,C:2):1);",
        "(((A:1,C:1):1,B:2):1);",
        "(((A:1,B:1):1,C:2):0.5);",
    ]));
    let tree = summarize(&mut source, &SummaryConfig::default(), None, &KdeContourEstimator::default()).unwrap();
    assert!(tree.has_trunk());
    assert_eq!(tree.node(tree.root()).metadata["posterior"], MetaValue::Number(1.0));
}

#[test]
fn pipeline_is_deterministic() {
    let config = SummaryConfig::default();
    let contour = KdeContourEstimator::default();
    let run = || {
        let mut source = InMemoryTreeSource::new(scenario_a());
        to_newick(&summarize(&mut source, &config, None, &contour).unwrap())
    };
    assert_eq!(run(), run());
}

#[test]
fn low_memory_source_matches_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.trees");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#NEXUS\nBegin trees;\n\tTranslate\n\t\t1 A,\n\t\t2 B,\n\t\t3 C\n;").unwrap();
    for (state, newick) in [
        "((1:1,2:1)[&rate=0.5]:1,3:2);",
        "((1:1.5,2:1.5)[&rate=0.6]:1,3:2.5);",
        "((1:1,3:1)[&rate=0.7]:1,2:2);",
        "((2:0.5,1:0.5)[&rate=0.4]:1,3:1.5);",
        "((1:1,2:1)[&rate=0.5]:2,3:3);",
    ]
    .iter()
    .enumerate()
    {
        writeln!(f, "tree STATE_{} = [&R] {newick}", state * 1000).unwrap();
    }
    writeln!(f, "End;").unwrap();
    drop(f);

    let config = SummaryConfig::default();
    let contour = KdeContourEstimator::default();

    let (taxa, posterior) = read_posterior_trees(&path, Burnin::Trees(1)).unwrap();
    assert_eq!(posterior.len(), 4);
    let mut in_memory = InMemoryTreeSource::new(posterior);
    let a = summarize(&mut in_memory, &config, None, &contour).unwrap();

    let mut streaming = NexusTreeSource::open(&path, Burnin::Trees(1)).unwrap();
    let b = summarize(&mut streaming, &config, None, &contour).unwrap();

    assert_eq!(format_nexus(&a, &taxa), format_nexus(&b, streaming.taxa()));
}
