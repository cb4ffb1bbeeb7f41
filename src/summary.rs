//! End-to-end summarization.
//!
//! ```text
//! validate config
//!   -> target: user tree, or SummaryTreeSelector (passes 1 and 2)
//!   -> AttributeAnnotator (pass 3)
//!   -> CaHeightEstimator (pass 4, CA heights only)
//! ```

use crate::annotate::AttributeAnnotator;
use crate::ca_heights::CaHeightEstimator;
use crate::config::{HeightSummary, SummaryConfig};
use crate::contour::ContourEstimator;
use crate::error::Result;
use crate::selector::SummaryTreeSelector;
use crate::source::PosteriorTreeSource;
use crate::tree::Tree;
use std::time::Instant;

/// Produces the annotated summary tree.
///
/// With `target` set, that tree is annotated instead of a selected one; its
/// existing annotations are discarded first. The configuration is checked
/// before the posterior is touched.
pub fn summarize(
    source: &mut dyn PosteriorTreeSource,
    config: &SummaryConfig,
    target: Option<Tree>,
    contour: &dyn ContourEstimator,
) -> Result<Tree> {
    config.validate()?;
    let t0 = Instant::now();

    let mut target = match target {
        Some(mut tree) => {
            tree.clear_annotations();
            tree
        }
        None => {
            SummaryTreeSelector::select(source, config.topology, config.process_sampled_ancestors)?.tree
        }
    };

    AttributeAnnotator::new(config, contour).annotate(&mut target, source)?;
    if config.heights == HeightSummary::CommonAncestor {
        CaHeightEstimator::new(config).estimate(&mut target, source)?;
    }

    tracing::info!(secs = t0.elapsed().as_secs_f64(), "summary complete");
    Ok(target)
}
