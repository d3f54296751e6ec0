//! Single-slot "latest frame" hand-off between a camera and the analysis loop.
//!
//! - **Push:** `FramePublisher::publish` overwrites the slot and wakes the waiting consumer.
//!   It never blocks; an unconsumed frame that gets overwritten is counted as skipped.
//! - **Pull:** `SlotSource` peeks the newest frame without consuming it, the way a
//!   camera core exposes its last image. Newness is decided by the consumer.
//! - **Interrupt:** closing the slot wakes any waiter with `AcquisitionError::Closed`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::component_a::frame::Frame;
use crate::error::AcquisitionError;

/// Pull-style frame source: returns the most recent frame the device holds, if any.
pub trait FrameSource: Send {
    fn latest_frame(&mut self) -> Result<Option<Arc<Frame>>, AcquisitionError>;
}

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<Frame>>,
    pending: bool,
    published: u64,
    overwritten: u64,
    closed: bool,
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Creates a connected publisher/receiver pair.
pub fn frame_slot() -> (FramePublisher, FrameReceiver) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::default()),
        ready: Condvar::new(),
    });
    (
        FramePublisher { slot: slot.clone() },
        FrameReceiver { slot },
    )
}

#[derive(Clone)]
pub struct FramePublisher {
    slot: Arc<Slot>,
}

impl FramePublisher {
    /// Stores `frame` as the latest one. Returns `false` if the slot is closed.
    pub fn publish(&self, frame: Frame) -> bool {
        {
            let mut s = self.slot.state.lock();
            if s.closed {
                return false;
            }
            if s.pending {
                s.overwritten += 1;
            }
            s.latest = Some(Arc::new(frame));
            s.pending = true;
            s.published += 1;
        }
        self.slot.ready.notify_one();
        true
    }

    /// Pull view over the same slot.
    pub fn source(&self) -> SlotSource {
        SlotSource {
            slot: self.slot.clone(),
        }
    }

    pub fn published(&self) -> u64 {
        self.slot.state.lock().published
    }

    /// Frames replaced before the consumer took them.
    pub fn skipped(&self) -> u64 {
        self.slot.state.lock().overwritten
    }

    pub fn close(&self) {
        self.slot.close();
    }
}

pub struct FrameReceiver {
    slot: Arc<Slot>,
}

impl FrameReceiver {
    /// Takes the newest unconsumed frame, waiting at most `timeout` for one.
    ///
    /// `Ok(None)` means nothing arrived in time.
    pub fn wait_next(&self, timeout: Duration) -> Result<Option<Arc<Frame>>, AcquisitionError> {
        let deadline = Instant::now() + timeout;
        let mut s = self.slot.state.lock();
        loop {
            if s.closed {
                return Err(AcquisitionError::Closed);
            }
            if s.pending {
                s.pending = false;
                return Ok(s.latest.clone());
            }
            if self.slot.ready.wait_until(&mut s, deadline).timed_out() {
                if s.pending && !s.closed {
                    s.pending = false;
                    return Ok(s.latest.clone());
                }
                return if s.closed {
                    Err(AcquisitionError::Closed)
                } else {
                    Ok(None)
                };
            }
        }
    }

    /// Handle that can close the slot from another thread.
    pub fn interrupter(&self) -> FrameInterrupt {
        FrameInterrupt {
            slot: self.slot.clone(),
        }
    }
}

#[derive(Clone)]
pub struct FrameInterrupt {
    slot: Arc<Slot>,
}

impl FrameInterrupt {
    pub fn interrupt(&self) {
        self.slot.close();
    }
}

/// Pull adapter over a frame slot.
#[derive(Clone)]
pub struct SlotSource {
    slot: Arc<Slot>,
}

impl FrameSource for SlotSource {
    fn latest_frame(&mut self) -> Result<Option<Arc<Frame>>, AcquisitionError> {
        let s = self.slot.state.lock();
        if s.closed {
            return Err(AcquisitionError::Closed);
        }
        Ok(s.latest.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn newest_frame_wins_and_older_ones_are_counted_as_skipped() {
        let (tx, rx) = frame_slot();
        for seq in 1..=5 {
            assert!(tx.publish(Frame::uniform(2, 2, seq as u16, seq)));
        }
        let frame = rx
            .wait_next(Duration::from_millis(10))
            .unwrap()
            .expect("frame pending");
        assert_eq!(frame.seq, 5);
        assert_eq!(tx.skipped(), 4);
        assert_eq!(tx.published(), 5);

        // consumed: a second wait sees nothing new
        assert!(rx.wait_next(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn waiter_is_woken_by_publish() {
        let (tx, rx) = frame_slot();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.publish(Frame::uniform(2, 2, 1, 42));
        });
        let frame = rx.wait_next(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.map(|f| f.seq), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn interrupt_wakes_waiter_with_closed() {
        let (tx, rx) = frame_slot();
        let interrupt = rx.interrupter();
        let waiter = thread::spawn(move || rx.wait_next(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        interrupt.interrupt();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(AcquisitionError::Closed)
        ));
        assert!(!tx.publish(Frame::uniform(1, 1, 0, 1)));
    }

    #[test]
    fn pull_source_peeks_without_consuming() {
        let (tx, rx) = frame_slot();
        let mut source = tx.source();
        assert!(source.latest_frame().unwrap().is_none());
        tx.publish(Frame::uniform(2, 2, 3, 7));
        assert_eq!(source.latest_frame().unwrap().map(|f| f.seq), Some(7));
        assert_eq!(source.latest_frame().unwrap().map(|f| f.seq), Some(7));
        assert!(rx.wait_next(Duration::ZERO).unwrap().is_some());
    }
}
