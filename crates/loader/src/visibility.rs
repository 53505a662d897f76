//! Viewport visibility tracking.
//!
//! The host forwards intersection notifications for the panel's surface
//! over an `mpsc` channel. The tracker turns them into a visible/hidden
//! flag and tells the loader whenever the flag flips.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

use crate::config::LoaderConfig;
use crate::loader::{Decision, PanelEvent, PanelLoader};

/// One intersection notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    pub is_intersecting: bool,
    /// Fraction of the surface inside the (margin-adjusted) viewport.
    pub intersection_ratio: f64,
}

impl IntersectionEntry {
    pub fn visible(ratio: f64) -> Self {
        IntersectionEntry {
            is_intersecting: true,
            intersection_ratio: ratio,
        }
    }

    pub fn hidden() -> Self {
        IntersectionEntry {
            is_intersecting: false,
            intersection_ratio: 0.0,
        }
    }
}

/// Observer settings handed to the host's intersection source.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    pub threshold: f64,
    pub root_margin: String,
}

#[derive(Debug, Clone)]
pub struct VisibilityTracker {
    options: ObserverOptions,
    visible: bool,
}

impl VisibilityTracker {
    pub fn new(threshold: f64, root_margin: &str) -> Self {
        VisibilityTracker {
            options: ObserverOptions {
                threshold: threshold.clamp(0.0, 1.0),
                root_margin: root_margin.to_string(),
            },
            visible: false,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.visibility_threshold, &config.root_margin)
    }

    pub fn options(&self) -> &ObserverOptions {
        &self.options
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Fold in a notification. Returns the new flag only when it flipped.
    pub fn observe(&mut self, entry: IntersectionEntry) -> Option<bool> {
        let visible = entry.is_intersecting && entry.intersection_ratio >= self.options.threshold;
        if visible == self.visible {
            return None;
        }
        self.visible = visible;
        Some(visible)
    }

    /// Drive `loader` from `entries` until the channel closes or the
    /// returned handle is torn down.
    ///
    /// Attempts started by a visibility flip run on their own tasks and are
    /// not cancelled by teardown.
    pub fn spawn(
        mut self,
        loader: Arc<PanelLoader>,
        mut entries: mpsc::Receiver<IntersectionEntry>,
    ) -> VisibilityHandle {
        let task = tokio::spawn(
            async move {
                while let Some(entry) = entries.recv().await {
                    let Some(visible) = self.observe(entry) else {
                        continue;
                    };
                    debug!(visible, "visibility changed");
                    if let Decision::Fetch(attempt) =
                        loader.evaluate(PanelEvent::VisibilityChanged(visible))
                    {
                        let loader = loader.clone();
                        tokio::spawn(async move {
                            loader.run(attempt).await;
                        });
                    }
                }
            }
            .instrument(info_span!("visibility")),
        );
        VisibilityHandle { task }
    }
}

/// Keeps a spawned tracker alive. Dropping it unsubscribes.
#[derive(Debug)]
pub struct VisibilityHandle {
    task: JoinHandle<()>,
}

impl VisibilityHandle {
    /// Stop reacting to notifications.
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for VisibilityHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
