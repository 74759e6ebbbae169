//! Quality-gated capture with retry
//!
//! The core reports quality and never judges it. This helper runs the
//! consumer side of the usual protocol: begin a capture, follow its events
//! to the terminal outcome, and either accept the result, retry, or give
//! up, using only the qualities the caller lists as acceptable.

use crate::session::{CaptureSession, SessionEvents};
use protocol::{
    CaptureOptions, CaptureOutcome, CaptureResult, Failure, FailureCode, FingerCountState,
    FingerQuality, ImageFrame, ImageResolution, ImageType, QualitySnapshot, SessionEvent,
};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};

/// How to run and judge a capture
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePolicy {
    pub image_type: ImageType,
    pub resolution: ImageResolution,
    pub options: CaptureOptions,
    /// Qualities every present finger must have; empty accepts any result
    pub accept: Vec<FingerQuality>,
    pub max_attempts: u32,
    /// Cancel an attempt that has not finished in time
    pub attempt_timeout: Option<Duration>,
    /// Cancel as soon as the engine sees something that is not a finger
    pub cancel_on_non_finger: bool,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            image_type: ImageType::FlatSingleFinger,
            resolution: ImageResolution::Ppi500,
            options: CaptureOptions::AUTO_CONTRAST | CaptureOptions::AUTO_CAPTURE,
            accept: vec![FingerQuality::Good],
            max_attempts: 3,
            attempt_timeout: None,
            cancel_on_non_finger: false,
        }
    }
}

impl CapturePolicy {
    /// Whether a final quality snapshot meets the policy
    pub fn accepts(&self, quality: &QualitySnapshot) -> bool {
        if self.accept.is_empty() {
            return true;
        }
        !quality.is_empty() && self.accept.contains(&quality.worst())
    }
}

/// Final result of [`run_capture`]
#[derive(Debug)]
pub enum CaptureReport {
    Accepted { result: CaptureResult, attempts: u32 },
    /// Last result when no attempt met the policy
    Rejected { result: CaptureResult, attempts: u32 },
    Cancelled { frame: ImageFrame, attempts: u32 },
    Failed { failure: Failure, attempts: u32 },
}

impl CaptureReport {
    pub fn attempts(&self) -> u32 {
        match self {
            CaptureReport::Accepted { attempts, .. }
            | CaptureReport::Rejected { attempts, .. }
            | CaptureReport::Cancelled { attempts, .. }
            | CaptureReport::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CaptureReport::Accepted { .. })
    }
}

/// Capture until the policy is met or the attempts run out
pub async fn run_capture(
    session: &CaptureSession,
    events: &mut SessionEvents,
    policy: &CapturePolicy,
) -> CaptureReport {
    run_capture_with(session, events, policy, |_, _| {}).await
}

/// Like [`run_capture`], showing every delivered event to `observer`
/// along with the attempt number
pub async fn run_capture_with(
    session: &CaptureSession,
    events: &mut SessionEvents,
    policy: &CapturePolicy,
    mut observer: impl FnMut(u32, &SessionEvent),
) -> CaptureReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        if let Err(failure) =
            session.begin_capture(policy.image_type, policy.resolution, policy.options)
        {
            warn!(attempt = attempts, %failure, "Capture could not start");
            return CaptureReport::Failed { failure, attempts };
        }

        let Some((outcome, timed_out)) =
            wait_for_terminal(session, events, policy, attempts, &mut observer).await
        else {
            return CaptureReport::Failed {
                failure: Failure::new(FailureCode::CommunicationBroken)
                    .with_detail("session closed before the capture finished"),
                attempts,
            };
        };

        let retry = attempts < max_attempts;
        match outcome {
            CaptureOutcome::Completed(result) => {
                if policy.accepts(result.quality()) {
                    info!(attempt = attempts, quality = ?result.quality().worst(), "Capture accepted");
                    return CaptureReport::Accepted { result, attempts };
                }
                if !retry {
                    return CaptureReport::Rejected { result, attempts };
                }
                info!(attempt = attempts, quality = ?result.quality().worst(), "Capture quality rejected, retrying");
            }
            CaptureOutcome::Cancelled(frame) => {
                if !(timed_out && retry) {
                    return CaptureReport::Cancelled { frame, attempts };
                }
                info!(attempt = attempts, "Capture attempt timed out, retrying");
            }
            CaptureOutcome::Failed(failure) => {
                let timeout = timed_out || failure.code == FailureCode::CaptureTimeout;
                if !(timeout && retry) {
                    return CaptureReport::Failed { failure, attempts };
                }
                info!(attempt = attempts, %failure, "Capture attempt timed out, retrying");
            }
        }
    }
}

/// Follow events to the terminal outcome, cancelling on timeout
///
/// Returns the outcome and whether the attempt was cancelled for taking
/// too long; `None` if the event stream ended first.
async fn wait_for_terminal(
    session: &CaptureSession,
    events: &mut SessionEvents,
    policy: &CapturePolicy,
    attempt: u32,
    observer: &mut impl FnMut(u32, &SessionEvent),
) -> Option<(CaptureOutcome, bool)> {
    let deadline = policy.attempt_timeout.map(|t| Instant::now() + t);
    let mut timed_out = false;
    let mut cancelled = false;

    loop {
        let event = match deadline.filter(|_| !cancelled) {
            Some(deadline) => match timeout_at(deadline, events.next()).await {
                Ok(event) => event?,
                Err(_) => {
                    warn!(attempt, "Capture attempt timed out, cancelling");
                    timed_out = true;
                    cancelled = true;
                    cancel(session);
                    continue;
                }
            },
            None => events.next().await?,
        };

        observer(attempt, &event);
        match event {
            SessionEvent::CaptureFinished(outcome) => return Some((outcome, timed_out)),
            SessionEvent::FingerCountChanged(FingerCountState::NonFinger)
                if policy.cancel_on_non_finger && !cancelled =>
            {
                info!(attempt, "Non-finger object on platen, cancelling");
                cancelled = true;
                cancel(session);
            }
            SessionEvent::CommunicationBroken => {
                warn!(attempt, "Device connection lost during capture");
            }
            other => trace!(attempt, event = other.name(), "Capture progress"),
        }
    }
}

fn cancel(session: &CaptureSession) {
    // A capture that already ended still delivers its terminal event
    if let Err(failure) = session.cancel_capture() {
        debug!(%failure, "Cancel request not applied");
    }
}
