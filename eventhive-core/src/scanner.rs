//! The scan loop: frames in, verdicts out.

use crate::frame::FrameSource;
use crate::verify::{Verdict, VerificationEngine};
use serde::Serialize;
use tracing::{debug, info};

/// Counters for one run of the scan loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Feed every non-empty frame through the engine until the source ends.
///
/// `on_verdict` receives each verdict as soon as it is decided.
pub async fn run_scanner<S, F>(
    engine: &mut VerificationEngine,
    source: &mut S,
    mut on_verdict: F,
) -> ScanSummary
where
    S: FrameSource + ?Sized,
    F: FnMut(&Verdict),
{
    let mut summary = ScanSummary::default();

    while let Some(frame) = source.next_frame().await {
        if frame.trim().is_empty() {
            continue;
        }

        let verdict = engine.verify(&frame).await;
        summary.scanned += 1;
        if verdict.is_accepted() {
            summary.accepted += 1;
        } else {
            summary.rejected += 1;
        }
        debug!("Scan {}: {}", summary.scanned, verdict);
        on_verdict(&verdict);
    }

    info!(
        "Frame source ended after {} scans ({} accepted, {} rejected)",
        summary.scanned, summary.accepted, summary.rejected
    );
    summary
}
