//! Weighted progress for one task

use crate::types::{StreamKind, StreamSelection};

/// Share of a part's progress contributed by each step, summing to 1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StepWeights {
    pub video: f32,
    pub audio: f32,
    pub merge: f32,
}

impl StepWeights {
    /// Full: 40/40/20, single stream: 100
    pub(crate) fn for_selection(selection: StreamSelection) -> Self {
        match selection {
            StreamSelection::Full => Self {
                video: 0.4,
                audio: 0.4,
                merge: 0.2,
            },
            StreamSelection::VideoOnly => Self {
                video: 1.0,
                audio: 0.0,
                merge: 0.0,
            },
            StreamSelection::AudioOnly => Self {
                video: 0.0,
                audio: 1.0,
                merge: 0.0,
            },
        }
    }

    /// Part progress (0..=100) with `kind` at `percent` and every earlier step done
    ///
    /// Steps run in the order video, audio, merge.
    pub(crate) fn part_percent(&self, kind: StreamKind, percent: f32) -> f32 {
        let fraction = (percent / 100.0).clamp(0.0, 1.0);
        let done = match kind {
            StreamKind::Video => self.video * fraction,
            StreamKind::Audio => self.video + self.audio * fraction,
            StreamKind::Merge => self.video + self.audio + self.merge * fraction,
        };
        (done * 100.0).clamp(0.0, 100.0)
    }
}

/// Position of the current part within the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartSlot {
    /// 1-based index
    pub index: u32,
    /// Number of parts in the task
    pub count: u32,
}

impl PartSlot {
    pub(crate) const SINGLE: PartSlot = PartSlot { index: 1, count: 1 };

    /// Task progress when this part is `part_percent` done
    pub(crate) fn overall(&self, part_percent: f32) -> f32 {
        let count = self.count.max(1) as f32;
        let done_before = (self.index.saturating_sub(1)) as f32;
        ((done_before + part_percent / 100.0) / count * 100.0).clamp(0.0, 100.0)
    }

    /// Message prefix for multi-part tasks
    pub(crate) fn label(&self) -> String {
        if self.count > 1 {
            format!("part {}/{}: ", self.index, self.count)
        } else {
            String::new()
        }
    }
}
