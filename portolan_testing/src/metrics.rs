//! Assertions over a [`DebuggingRecorder`] snapshot.

use metrics::SharedString;
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// Create a debugging recorder and the snapshotter observing it.
#[must_use]
pub fn debugging_recorder() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

type Entry = (
    CompositeKey,
    Option<metrics::Unit>,
    Option<SharedString>,
    DebugValue,
);

/// Metrics captured by a single snapshot.
pub struct Captured(Vec<Entry>);

impl Captured {
    /// Take one snapshot from `snapshotter`.
    #[must_use]
    pub fn take(snapshotter: &Snapshotter) -> Self { Self(snapshotter.snapshot().into_vec()) }

    /// Sum of counter `name` across series carrying the label `key=value`.
    ///
    /// Returns zero when nothing matching was recorded.
    #[must_use]
    pub fn counter(&self, name: &str, label: (&str, &str)) -> u64 {
        self.0
            .iter()
            .filter(|(key, _, _, _)| {
                key.key().name() == name
                    && key
                        .key()
                        .labels()
                        .any(|l| l.key() == label.0 && l.value() == label.1)
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(c) => *c,
                _ => 0,
            })
            .sum()
    }

    /// Current value of gauge `name`, if it was touched.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.0.iter().find_map(|(key, _, _, value)| match value {
            DebugValue::Gauge(g) if key.key().name() == name => Some(g.into_inner()),
            _ => None,
        })
    }
}
