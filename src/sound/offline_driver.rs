//! Render a session without a sound card.
//!
//! Blocks are pulled one after another as fast as the engine can go, on a max priority thread
//! like the real drivers get.  Handy for checking a mix and for tests.
use log::{debug, error, info};
use simple_error::bail;
use std::thread;
use thread_priority::{ThreadBuilder, ThreadPriority};

use super::SoundCallback;
use crate::common::box_error::BoxError;

/// Planar stereo audio
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn with_frames(frames: usize) -> StereoBuffer {
        StereoBuffer {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }
    pub fn frames(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    /// 32 bit float stereo wav
    pub fn write_wav(&self, path: &str, sample_rate: u32) -> Result<(), BoxError> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for i in 0..self.frames() {
            writer.write_sample(self.left[i])?;
            writer.write_sample(self.right[i])?;
        }
        writer.finalize()?;
        info!("wrote {} frames to {}", self.frames(), path);
        Ok(())
    }
}

pub struct OfflineDriver {
    block_size: usize,
}

impl OfflineDriver {
    pub fn new(block_size: usize) -> OfflineDriver {
        OfflineDriver {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Run `frames` frames of `input` (silence where it runs out) through the engine.
    pub fn render<C: SoundCallback>(
        &self,
        engine: &mut C,
        input: &StereoBuffer,
        frames: usize,
    ) -> Result<StereoBuffer, BoxError> {
        let mut out = StereoBuffer::with_frames(frames);
        let mut in_a = vec![0.0; self.block_size];
        let mut in_b = vec![0.0; self.block_size];
        let mut pos = 0;
        while pos < frames {
            let n = self.block_size.min(frames - pos);
            for i in 0..n {
                in_a[i] = input.left.get(pos + i).copied().unwrap_or(0.0);
                in_b[i] = input.right.get(pos + i).copied().unwrap_or(0.0);
            }
            engine.process(
                &in_a[..n],
                &in_b[..n],
                &mut out.left[pos..pos + n],
                &mut out.right[pos..pos + n],
            )?;
            pos += n;
        }
        debug!("offline render of {} frames done", frames);
        Ok(out)
    }

    /// Render on a max priority thread.  The engine comes back with the audio.
    pub fn spawn_render<C>(
        self,
        mut engine: C,
        input: StereoBuffer,
        frames: usize,
    ) -> Result<thread::JoinHandle<Result<(C, StereoBuffer), BoxError>>, BoxError>
    where
        C: SoundCallback + Send + 'static,
    {
        let builder = ThreadBuilder::default()
            .name("Offline Render Thread".to_string())
            .priority(ThreadPriority::Max);
        let handle = builder.spawn(move |result| {
            if let Err(e) = result {
                debug!("could not raise render thread priority: {:?}", e);
            }
            match self.render(&mut engine, &input, frames) {
                Ok(out) => Ok((engine, out)),
                Err(e) => {
                    error!("offline render failed: {}", e);
                    Err(e)
                }
            }
        })?;
        Ok(handle)
    }
}

/// wait for a [`OfflineDriver::spawn_render`] thread
pub fn join_render<C>(
    handle: thread::JoinHandle<Result<(C, StereoBuffer), BoxError>>,
) -> Result<(C, StereoBuffer), BoxError> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => bail!("offline render thread panicked"),
    }
}
