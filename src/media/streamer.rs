use anyhow::Result;
use tracing::debug;

use super::{Frame, FrameDecoder, FrameIter, MediaSource};

pub const DEFAULT_CHUNK_SIZE: usize = 25;

/// Groups the sampled frames of one source into bounded chunks.
///
/// Every `sampling_interval`-th native frame is kept, output stops once the
/// source's frame cap is reached, and the trailing partial chunk is always
/// delivered. The stream is single-pass.
pub struct FrameStreamer<I> {
    frames: I,
    chunk_size: usize,
    sampling_interval: u64,
    limit: Option<usize>,
    emitted: usize,
    finished: bool,
}

impl FrameStreamer<FrameIter> {
    /// Open `source` through `decoder` and stream it in chunks of `chunk_size`
    #[inline]
    pub fn open(
        decoder: &dyn FrameDecoder,
        source: &MediaSource,
        chunk_size: usize,
    ) -> Result<Self> {
        debug!("Opening frame stream for {}", source.name());
        let frames = decoder.frames(source)?;
        Ok(Self::new(
            frames,
            chunk_size,
            source.sampling_interval(),
            source.frame_count_limit(),
        ))
    }
}

impl<I> FrameStreamer<I>
where
    I: Iterator<Item = Result<Frame>>,
{
    #[inline]
    pub fn new(frames: I, chunk_size: usize, sampling_interval: u32, limit: Option<u32>) -> Self {
        Self {
            frames,
            chunk_size: chunk_size.max(1),
            sampling_interval: u64::from(sampling_interval.max(1)),
            limit: limit.map(|l| l as usize),
            emitted: 0,
            finished: false,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }
}

impl<I> Iterator for FrameStreamer<I>
where
    I: Iterator<Item = Result<Frame>>,
{
    type Item = Result<Vec<Frame>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);

        while chunk.len() < self.chunk_size && !self.limit_reached() {
            match self.frames.next() {
                Some(Ok(frame)) => {
                    if frame.index % self.sampling_interval != 0 {
                        continue;
                    }
                    chunk.push(frame);
                    self.emitted += 1;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if self.limit_reached() {
            self.finished = true;
        }

        if chunk.is_empty() {
            self.finished = true;
            return None;
        }

        Some(Ok(chunk))
    }
}
