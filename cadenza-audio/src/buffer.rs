//! Frame-based single-producer single-consumer ring buffer.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

/// Lock-free SPSC ring buffer for interleaved f32 audio, sized and
/// accounted in frames.
///
/// Writes and reads only ever move whole frames, so
/// `available_data() + available_space() == capacity()` holds at every
/// observable point. The producer and consumer halves use acquire/release
/// atomics internally; one thread may write while another reads without
/// extra locking.
pub struct RingBuffer {
    producer: ringbuf::HeapProd<f32>,
    consumer: ringbuf::HeapCons<f32>,
    capacity_frames: usize,
    channels: usize,
}

impl RingBuffer {
    /// Creates a buffer holding `capacity_frames` frames of `channels`
    /// interleaved channels.
    pub fn new(capacity_frames: usize, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let rb = HeapRb::<f32>::new(capacity_frames * channels);
        let (producer, consumer) = rb.split();
        RingBuffer {
            producer,
            consumer,
            capacity_frames,
            channels,
        }
    }

    /// Writes as many whole frames from `samples` as fit.
    ///
    /// `samples` is interleaved; a trailing partial frame is ignored.
    /// Returns the number of frames written.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let want = samples.len() / self.channels;
        let fit = self.producer.vacant_len() / self.channels;
        let frames = want.min(fit);
        if frames == 0 {
            return 0;
        }
        let pushed = self.producer.push_slice(&samples[..frames * self.channels]);
        debug_assert_eq!(pushed, frames * self.channels);
        frames
    }

    /// Reads up to `out.len() / channels` whole frames into `out`.
    ///
    /// Returns the number of frames read; `out` beyond that point is left
    /// untouched.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let want = out.len() / self.channels;
        let have = self.consumer.occupied_len() / self.channels;
        let frames = want.min(have);
        if frames == 0 {
            return 0;
        }
        let popped = self.consumer.pop_slice(&mut out[..frames * self.channels]);
        debug_assert_eq!(popped, frames * self.channels);
        frames
    }

    /// Discards everything buffered. Consumer-side operation.
    pub fn reset(&mut self) {
        self.consumer.clear();
    }

    /// Frames currently buffered.
    pub fn available_data(&self) -> usize {
        self.consumer.occupied_len() / self.channels
    }

    /// Frames that can still be written.
    pub fn available_space(&self) -> usize {
        self.producer.vacant_len() / self.channels
    }

    /// Total capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.available_data() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available_space() == 0
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity_frames", &self.capacity_frames)
            .field("channels", &self.channels)
            .field("available_data", &self.available_data())
            .finish()
    }
}
