use clap::{Parser, ValueEnum};
use rust_python_tree_annotator::config::{HeightSummary, SummaryConfig, TargetTopology};
use rust_python_tree_annotator::contour::KdeContourEstimator;
use rust_python_tree_annotator::io::{
    Burnin, NexusTreeSource, read_posterior_trees, read_target_tree, write_annotated_nexus,
};
use rust_python_tree_annotator::source::{InMemoryTreeSource, PosteriorTreeSource};
use rust_python_tree_annotator::summary::summarize;
use rust_python_tree_annotator::tree::TaxonSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::Level;

/// Summarize a BEAST posterior tree sample into one annotated tree:
/// clade support, node heights with HPD intervals and per-node attribute statistics.
#[derive(Parser, Debug)]
#[command(name = "tree-annotator", version, about = "Annotated summary tree for BEAST posterior trees")]
struct Args {
    /// Path to BEAST .trees (NEXUS) file, optionally gzipped
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path for the annotated NEXUS tree (`-` for stdout, `.gz` to compress)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Burn-in as a percentage of the trees in the file
    #[arg(short = 'b', long = "burnin", default_value_t = 0.0)]
    burnin: f64,

    /// Burn-in by number of trees (drop first N trees)
    #[arg(short = 't', long = "burnin-trees", default_value_t = 0)]
    burnin_trees: usize,

    /// Burn-in by state (keep trees with STATE_ > value)
    #[arg(short = 's', long = "burnin-states", default_value_t = 0)]
    burnin_states: usize,

    /// How node heights are summarized
    #[arg(long = "heights", value_enum, default_value_t = HeightsArg::Mean)]
    heights: HeightsArg,

    /// How the summary topology is chosen
    #[arg(long = "topology", value_enum, default_value_t = TopologyArg::Mcc)]
    topology: TopologyArg,

    /// Annotate this tree (NEXUS or Newick) instead of selecting one from the posterior
    #[arg(long = "target")]
    target: Option<PathBuf>,

    /// Posterior probability below which node annotations are suppressed
    #[arg(long = "limit", default_value_t = 0.0)]
    limit: f64,

    /// Mass of the HPD intervals
    #[arg(long = "hpd", default_value_t = 0.95)]
    hpd: f64,

    /// Mass of the bivariate HPD regions
    #[arg(long = "hpd2d", default_value_t = 0.80)]
    hpd2d: f64,

    /// Do not treat zero-length leaves as sampled ancestors
    #[arg(long = "no-sa", default_value_t = false)]
    no_sampled_ancestors: bool,

    /// Skip bivariate HPD regions for two-component attributes
    #[arg(long = "no-bivariate", default_value_t = false)]
    no_bivariate: bool,

    /// Summarize integer-valued attributes as discrete traits
    #[arg(long = "discrete-integers", default_value_t = false)]
    discrete_integers: bool,

    /// Re-read the input on every pass instead of holding all trees in memory
    #[arg(long = "low-mem", default_value_t = false)]
    low_mem: bool,

    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum HeightsArg { Keep, Mean, Median, Ca }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TopologyArg { Mcc, Mscc }

impl Args {
    fn config(&self) -> SummaryConfig {
        SummaryConfig {
            heights: match self.heights {
                HeightsArg::Keep => HeightSummary::Keep,
                HeightsArg::Mean => HeightSummary::Mean,
                HeightsArg::Median => HeightSummary::Median,
                HeightsArg::Ca => HeightSummary::CommonAncestor,
            },
            topology: match self.topology {
                TopologyArg::Mcc => TargetTopology::MaxCladeCredibility,
                TopologyArg::Mscc => TargetTopology::MaxSumCladeCredibility,
            },
            posterior_limit: self.limit,
            hpd_mass: self.hpd,
            hpd2d_mass: self.hpd2d,
            process_sampled_ancestors: !self.no_sampled_ancestors,
            process_bivariate: !self.no_bivariate,
            discrete_integers: self.discrete_integers,
        }
    }
}

fn main() {
    let args = Args::parse();
    let level = if args.quiet { Level::WARN } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = args.config();
    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        std::process::exit(2);
    }
    let burnin = match Burnin::from_options(args.burnin_trees, args.burnin_states, args.burnin) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    };

    // Read trees, or just the header in low-memory mode
    let t0 = Instant::now();
    let (taxa, mut source) = match open_source(&args, burnin) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to read {:?}: {e}", args.input);
            std::process::exit(2);
        }
    };
    let target = match args.target.as_ref().map(|p| read_target_tree(p, &taxa)).transpose() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to read target tree {:?}: {e}", args.target);
            std::process::exit(2);
        }
    };
    tracing::info!(
        taxa = taxa.len(),
        trees = source.approx_total_trees(),
        secs = t0.elapsed().as_secs_f64(),
        "read posterior"
    );

    let tree = match summarize(source.as_mut(), &config, target, &KdeContourEstimator::default()) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Failed to summarize trees: {e}");
            std::process::exit(3);
        }
    };

    let t1 = Instant::now();
    if let Err(e) = write_annotated_nexus(&args.output, &tree, &taxa) {
        tracing::error!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
    tracing::info!(
        output = %args.output.display(),
        secs = t1.elapsed().as_secs_f64(),
        "wrote summary tree"
    );
}

fn open_source(
    args: &Args,
    burnin: Burnin,
) -> rust_python_tree_annotator::Result<(TaxonSet, Box<dyn PosteriorTreeSource>)> {
    if args.low_mem {
        let source = NexusTreeSource::open(&args.input, burnin)?;
        Ok((source.taxa().clone(), Box::new(source) as Box<dyn PosteriorTreeSource>))
    } else {
        let (taxa, trees) = read_posterior_trees(&args.input, burnin)?;
        Ok((taxa, Box::new(InMemoryTreeSource::new(trees)) as Box<dyn PosteriorTreeSource>))
    }
}
