//! Lock free stereo sample ring between a feeding thread and the audio thread.
//!
//! Samples travel interleaved (L, R, L, R ...).  The writer only ever pushes whole frames and
//! the reader only ever pops whole frames, so the channels can't slip against each other.
use log::trace;

pub struct RingWriter {
    producer: rtrb::Producer<f32>,
    frames: usize,
    overruns: usize,
}

pub struct RingReader {
    consumer: rtrb::Consumer<f32>,
}

/// ring holding `frames` stereo frames
pub fn sample_ring(frames: usize) -> (RingWriter, RingReader) {
    let frames = frames.max(1);
    let (producer, consumer) = rtrb::RingBuffer::new(frames * 2);
    (
        RingWriter {
            producer,
            frames,
            overruns: 0,
        },
        RingReader { consumer },
    )
}

impl RingWriter {
    /// Push interleaved samples.  Frames that don't fit are dropped and counted.  Returns the
    /// number of frames written.
    pub fn write_interleaved(&mut self, samples: &[f32]) -> usize {
        let wanted = samples.len() / 2;
        let room = self.producer.slots() / 2;
        let frames = wanted.min(room);
        for s in &samples[..frames * 2] {
            if self.producer.push(*s).is_err() {
                // can't happen, we checked the slots
                break;
            }
        }
        if frames < wanted {
            self.overruns += 1;
            trace!("sample ring full, dropped {} frames", wanted - frames);
        }
        frames
    }
    /// frames the ring holds when full
    pub fn capacity(&self) -> usize {
        self.frames
    }
    pub fn free_frames(&self) -> usize {
        self.producer.slots() / 2
    }
    pub fn overruns(&self) -> usize {
        self.overruns
    }
    /// the reading side has been dropped (track removed)
    pub fn is_abandoned(&self) -> bool {
        self.producer.is_abandoned()
    }
}

impl RingReader {
    pub fn available_frames(&self) -> usize {
        self.consumer.slots() / 2
    }
    /// Pull up to `left.len()` frames into the planar buffers.  Returns the frame count; the
    /// rest of the buffers is left untouched.
    pub fn read_planar(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        let frames = left.len().min(right.len()).min(self.available_frames());
        if frames == 0 {
            return 0;
        }
        match self.consumer.read_chunk(frames * 2) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                let mut i = 0;
                for s in first.iter().chain(second.iter()) {
                    if i % 2 == 0 {
                        left[i / 2] = *s;
                    } else {
                        right[i / 2] = *s;
                    }
                    i += 1;
                }
                chunk.commit_all();
                frames
            }
            Err(_) => 0,
        }
    }
    /// the writing side has been dropped, nothing more is coming
    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }
    /// Drop up to `frames` frames from the front.  Returns how many went.
    pub fn skip(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.available_frames());
        if frames == 0 {
            return 0;
        }
        match self.consumer.read_chunk(frames * 2) {
            Ok(chunk) => {
                chunk.commit_all();
                frames
            }
            Err(_) => 0,
        }
    }
    /// throw away everything buffered
    pub fn clear(&mut self) -> usize {
        let slots = self.consumer.slots();
        match self.consumer.read_chunk(slots) {
            Ok(chunk) => {
                chunk.commit_all();
                slots / 2
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod test_sample_ring {
    use super::*;

    #[test]
    fn planar_out_of_interleaved_in() {
        let (mut writer, mut reader) = sample_ring(8);
        assert_eq!(writer.write_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3]), 3);
        assert_eq!(reader.available_frames(), 3);
        let mut l = [0.0; 2];
        let mut r = [0.0; 2];
        assert_eq!(reader.read_planar(&mut l, &mut r), 2);
        assert_eq!(l, [0.1, 0.2]);
        assert_eq!(r, [-0.1, -0.2]);
        assert_eq!(reader.available_frames(), 1);
    }

    #[test]
    fn overrun_drops_tail() {
        let (mut writer, reader) = sample_ring(2);
        assert_eq!(writer.write_interleaved(&[1.0; 10]), 2);
        assert_eq!(writer.overruns(), 1);
        assert_eq!(writer.free_frames(), 0);
        assert_eq!(reader.available_frames(), 2);
    }

    #[test]
    fn odd_sample_is_ignored() {
        let (mut writer, reader) = sample_ring(4);
        assert_eq!(writer.write_interleaved(&[1.0, 2.0, 3.0]), 1);
        assert_eq!(reader.available_frames(), 1);
    }

    #[test]
    fn short_read_and_clear() {
        let (mut writer, mut reader) = sample_ring(8);
        writer.write_interleaved(&[0.5; 6]);
        let mut l = [9.0; 4];
        let mut r = [9.0; 4];
        assert_eq!(reader.read_planar(&mut l, &mut r), 3);
        assert_eq!(l[3], 9.0);
        writer.write_interleaved(&[0.5; 4]);
        assert_eq!(reader.clear(), 2);
        assert_eq!(reader.available_frames(), 0);
    }

    #[test]
    fn abandoned_when_reader_gone() {
        let (writer, reader) = sample_ring(2);
        drop(reader);
        assert!(writer.is_abandoned());
        let (writer, reader) = sample_ring(2);
        assert_eq!(writer.capacity(), 2);
        drop(writer);
        assert!(reader.is_abandoned());
    }

    #[test]
    fn skip_whole_frames() {
        let (mut writer, mut reader) = sample_ring(8);
        writer.write_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
        assert_eq!(reader.skip(2), 2);
        assert_eq!(reader.skip(5), 1);
        assert_eq!(reader.skip(1), 0);
        writer.write_interleaved(&[0.4, -0.4]);
        let mut l = [0.0; 1];
        let mut r = [0.0; 1];
        reader.read_planar(&mut l, &mut r);
        assert_eq!((l[0], r[0]), (0.4, -0.4));
    }
}
