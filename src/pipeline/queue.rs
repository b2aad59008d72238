//! Presentation queue, pacer and frame-rate telemetry.

use std::collections::VecDeque;

use tracing::debug;

use crate::decoder::DecodedFrame;

/// What a pacer tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub rendered: bool,
    /// Fewer than the ACK threshold frames remain after the pop
    pub send_ack: bool,
    /// Frames remain; the caller must submit another tick
    pub reschedule: bool,
}

/// FIFO of decoded frames drained one per tick.
///
/// `underflow` is true while no tick is pending. A push into an idle queue
/// asks the caller to tick immediately; a tick that leaves frames behind asks
/// for another tick, and a tick that drains the queue returns it to idle.
#[derive(Debug)]
pub struct PresentationQueue {
    frames: VecDeque<DecodedFrame>,
    underflow: bool,
    ack_threshold: usize,
}

impl PresentationQueue {
    pub fn new(ack_threshold: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            underflow: true,
            ack_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Queue a frame. Returns true when the pacer was idle and the caller
    /// should tick right away.
    pub fn push(&mut self, frame: DecodedFrame) -> bool {
        self.frames.push_back(frame);
        self.underflow
    }

    /// Present the oldest frame through `present`, which takes ownership of
    /// the frame and must release it.
    pub fn tick(&mut self, present: impl FnOnce(DecodedFrame)) -> TickOutcome {
        self.underflow = self.frames.is_empty();
        let Some(frame) = self.frames.pop_front() else {
            return TickOutcome::default();
        };

        present(frame);

        let remaining = self.frames.len();
        let reschedule = remaining > 0;
        if !reschedule {
            self.underflow = true;
        }
        TickOutcome {
            rendered: true,
            send_ack: remaining < self.ack_threshold,
            reschedule,
        }
    }

    /// Release every frame but the newest. Returns true if the caller must
    /// schedule a tick to present what is left.
    pub fn clear_buffers(&mut self) -> bool {
        let stale = self.frames.len().saturating_sub(1);
        for frame in self.frames.drain(..stale) {
            frame.close();
        }
        debug!(released = stale, "cleared presentation queue");

        let needs_tick = self.underflow && !self.frames.is_empty();
        if needs_tick {
            self.underflow = false;
        }
        needs_tick
    }

    /// Release everything, used on shutdown.
    pub fn release_all(&mut self) {
        for frame in self.frames.drain(..) {
            frame.close();
        }
        self.underflow = true;
    }
}

#[cfg(test)]
impl PresentationQueue {
    /// No tick is pending
    fn is_idle(&self) -> bool {
        self.underflow
    }
}

impl Drop for PresentationQueue {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Rendered-frame counter sampled once per second, averaged over a window.
#[derive(Debug)]
pub struct FrameStats {
    rendered: u64,
    samples: VecDeque<u64>,
    window: usize,
}

impl FrameStats {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            rendered: 0,
            samples: VecDeque::with_capacity(window + 1),
            window,
        }
    }

    pub fn record_render(&mut self) {
        self.rendered += 1;
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    /// Take the once-per-second sample and return the averaged rate.
    pub fn sample(&mut self) -> u32 {
        self.samples.push_back(self.rendered);
        if self.samples.len() > self.window + 1 {
            self.samples.pop_front();
        }
        match (self.samples.front(), self.samples.back()) {
            (Some(oldest), Some(newest)) => {
                let span = (self.samples.len() - 1).max(1) as u64;
                ((newest - oldest) as f64 / span as f64).round() as u32
            }
            _ => 0,
        }
    }
}
