//! Handing loaded artifacts to whatever makes use of them.

use tracing::{debug, warn};

use crate::common::Artifact;
use crate::error::Result;
use crate::fsx;
use crate::workers::{chunked, run_groups, Weighed};

/// Receives the final artifact list, possibly split into several
/// order-preserving batches that are consumed concurrently.
pub trait ArtifactConsumer: Sync {
    type Output: Send;

    fn consume(&self, artifacts: &[Artifact]) -> Result<Vec<Self::Output>>;
}

/// Feed `artifacts` to `consumer`.
///
/// With `parallel`, artifacts are chunked by file size (order kept) and each
/// chunk is consumed on its own worker. If any chunk fails, the whole list is
/// handed over again in one serial call and that result is returned.
pub fn install<A: ArtifactConsumer>(
    artifacts: &[Artifact],
    consumer: &A,
    parallel: bool,
) -> Result<Vec<A::Output>> {
    if parallel && artifacts.len() > 1 {
        let weighed: Vec<Weighed<&Artifact>> = artifacts
            .iter()
            .map(|a| Weighed {
                item: a,
                weight: fsx::metadata(&a.path).map(|m| m.len()).unwrap_or(0),
            })
            .collect();
        let plan = chunked(weighed);

        if plan.len() > 1 {
            debug!(chunks = plan.len(), artifacts = artifacts.len(), "installing in parallel");
            let outcome = run_groups(&plan, |_, chunk| {
                let batch: Vec<Artifact> = chunk.iter().map(|w| w.item.clone()).collect();
                consumer.consume(&batch)
            });
            match outcome {
                Ok(out) => return Ok(out),
                Err(e) => warn!(error = %e, "parallel install failed, retrying serially"),
            }
        }
    }
    consumer.consume(artifacts)
}
