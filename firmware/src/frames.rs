//! Bounded frame queue between the CSI callback and the export task.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use csi_node_core::export::{FRAME_QUEUE_DEPTH, FrameSink, SequencedFrame};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Sender, TrySendError};

pub type FrameQueue<M> = Channel<M, SequencedFrame, FRAME_QUEUE_DEPTH>;

/// Producer half used from the driver callback. Never waits.
pub struct QueueSink<'a, M: RawMutex> {
    sender: Sender<'a, M, SequencedFrame, FRAME_QUEUE_DEPTH>,
}

impl<'a, M: RawMutex> QueueSink<'a, M> {
    #[must_use]
    pub fn new(queue: &'a FrameQueue<M>) -> Self {
        Self {
            sender: queue.sender(),
        }
    }
}

impl<M: RawMutex> FrameSink for QueueSink<'_, M> {
    fn try_push(&mut self, frame: SequencedFrame) -> Result<(), SequencedFrame> {
        self.sender
            .try_send(frame)
            .map_err(|TrySendError::Full(frame)| frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csi_node_core::export::{CsiFrame, CsiIngress, IngressOutcome};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    const AP: [u8; 6] = [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01];

    fn frame() -> CsiFrame {
        CsiFrame {
            mac: AP,
            ..CsiFrame::default()
        }
    }

    #[test]
    fn full_queue_drops_the_newest_frame() {
        let queue = FrameQueue::<NoopRawMutex>::new();
        let mut ingress = CsiIngress::new(QueueSink::new(&queue), AP);

        for seq in 0..FRAME_QUEUE_DEPTH {
            let seq = u32::try_from(seq).unwrap();
            assert_eq!(ingress.on_frame(frame()), IngressOutcome::Queued { seq });
        }
        let overflow = u32::try_from(FRAME_QUEUE_DEPTH).unwrap();
        assert_eq!(
            ingress.on_frame(frame()),
            IngressOutcome::Dropped { seq: overflow }
        );
        assert_eq!(ingress.dropped(), 1);

        assert_eq!(queue.try_receive().unwrap().seq, 0);
        assert_eq!(
            ingress.on_frame(frame()),
            IngressOutcome::Queued { seq: overflow + 1 }
        );
    }
}
