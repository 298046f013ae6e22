//! Gapless playback scheduling.
//!
//! The scheduler does not hold a queue of pending audio. Each segment is
//! handed to the output immediately with an absolute start time; the caller
//! owns the "next start" bookkeeping. The scheduler only tracks which handles
//! are still live so they can all be cut at once.

use std::collections::HashSet;

use anyhow::Result;

use super::codec::PlaybackBuffer;
use super::output::{AudioOutput, SegmentId};

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    active: HashSet<SegmentId>,
    next_id: SegmentId,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            active: HashSet::new(),
            next_id: 1,
        }
    }

    /// Output device clock, in seconds.
    pub fn now(&self) -> f64 {
        self.output.current_time()
    }

    /// Start `buffer` at `start_time` on the output clock.
    pub fn schedule(&mut self, buffer: &PlaybackBuffer, start_time: f64) -> Result<SegmentId> {
        let id = self.next_id;
        self.next_id += 1;
        self.output.start(id, buffer, start_time)?;
        self.active.insert(id);
        log::trace!(
            "Scheduled segment {} at {:.3}s for {:.3}s",
            id,
            start_time,
            buffer.duration()
        );
        Ok(id)
    }

    /// A segment played out naturally.
    pub fn finished(&mut self, id: SegmentId) -> bool {
        self.active.remove(&id)
    }

    /// Halt every live segment and forget them. Returns how many were live.
    pub fn stop_all(&mut self) -> usize {
        let count = self.active.len();
        for id in self.active.drain() {
            if let Err(e) = self.output.stop(id) {
                // Usually it finished between the completion report and now.
                log::debug!("Segment {} could not be stopped: {}", id, e);
            }
        }
        count
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Stop everything and release the output device.
    pub fn close(&mut self) {
        self.stop_all();
        self.output.close();
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
