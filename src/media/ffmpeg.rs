use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Frame, FrameDecoder, FrameIter, MediaInfo, MediaSource};

/// Characters of ffmpeg's stderr kept in a failure message
const STDERR_TAIL_CHARS: usize = 1000;

/// Frame decoder backed by the `ffmpeg` and `ffprobe` command line tools
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    #[inline]
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegDecoder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Check that both tools can be executed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .with_context(|| format!("Failed to execute {}", binary.display()))?;
            anyhow::ensure!(status.success(), "{} -version failed", binary.display());
        }
        Ok(())
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,nb_frames:format=duration",
                "-of",
                "json",
            ])
            .arg(path.as_os_str())
            .output()
            .with_context(|| format!("Failed to execute ffprobe for {}", path.display()))?;

        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let probe: ProbeOutput =
            serde_json::from_slice(&output.stdout).context("Failed to parse ffprobe output")?;
        parse_probe(probe).with_context(|| format!("Unusable media info for {}", path.display()))
    }

    fn frames(&self, source: &MediaSource) -> Result<FrameIter> {
        let info = self.probe(source.source_path())?;
        let interval = source.sampling_interval().max(1);

        let mut command = Command::new(&self.ffmpeg);
        command.args(["-v", "error", "-nostdin"]);
        if source.start() > 0.0 {
            command.arg("-ss").arg(format!("{:.3}", source.start()));
        }
        if let Some(end) = source.end() {
            let span = (end - source.start()).max(0.0);
            command.arg("-t").arg(format!("{:.3}", span));
        }
        command
            .arg("-i")
            .arg(source.source_path().as_os_str())
            .arg("-vf")
            .arg(format!("select='not(mod(n\\,{}))'", interval))
            .args(["-vsync", "vfr"]);
        if let Some(limit) = source.frame_count_limit() {
            command.arg("-frames:v").arg(limit.to_string());
        }
        command
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Spawning ffmpeg for {}", source.name());
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn ffmpeg for {}", source.name()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout was not captured"))?;
        let stderr = child.stderr.take().map(|mut stderr| {
            // Drained on its own thread so a chatty ffmpeg cannot block on a full pipe
            std::thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                String::from_utf8_lossy(&buffer).into_owned()
            })
        });

        Ok(Box::new(RawFrames {
            child,
            stdout,
            stderr,
            width: info.width,
            height: info.height,
            frame_rate: info.frame_rate,
            start: source.start(),
            interval: u64::from(interval),
            produced: 0,
            finished: false,
        }))
    }
}

fn parse_probe(probe: ProbeOutput) -> Result<MediaInfo> {
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no video stream"))?;

    let width = stream.width.ok_or_else(|| anyhow::anyhow!("missing width"))?;
    let height = stream
        .height
        .ok_or_else(|| anyhow::anyhow!("missing height"))?;
    anyhow::ensure!(
        width > 0 && height > 0,
        "invalid frame size {}x{}",
        width,
        height
    );
    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| anyhow::anyhow!("missing frame rate"))?;
    let duration_secs = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .and_then(|n| n.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration_secs * frame_rate).round() as u64);

    Ok(MediaInfo {
        frame_count,
        frame_rate,
        duration_secs,
        width,
        height,
    })
}

/// Parse ffprobe rates such as `30000/1001` or `25`
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

/// Raw RGB24 frames read from a running ffmpeg process
struct RawFrames {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    frame_rate: f64,
    start: f64,
    interval: u64,
    produced: u64,
    finished: bool,
}

impl Iterator for RawFrames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut data = vec![0_u8; Frame::rgb_len(self.width, self.height)];
        match self.stdout.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                return self.exit_error().map(Err);
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(anyhow::Error::new(e).context("Failed to read frame from ffmpeg")));
            }
        }

        let index = self.produced * self.interval;
        self.produced += 1;

        Some(Ok(Frame {
            index,
            timestamp: self.start + index as f64 / self.frame_rate,
            width: self.width,
            height: self.height,
            data,
        }))
    }
}

impl RawFrames {
    /// Wait for ffmpeg after end of output and report an unsuccessful exit
    fn exit_error(&mut self) -> Option<anyhow::Error> {
        let status = match self.child.wait() {
            Ok(status) => status,
            Err(e) => return Some(anyhow::Error::new(e).context("Failed to wait for ffmpeg")),
        };
        if status.success() {
            return None;
        }

        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        Some(anyhow::anyhow!(
            "ffmpeg exited with {} after {} frames: {}",
            status,
            self.produced,
            stderr_tail(&stderr)
        ))
    }
}

fn stderr_tail(stderr: &str) -> &str {
    let trimmed = stderr.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    match trimmed.char_indices().nth(skip) {
        Some((offset, _)) => &trimmed[offset..],
        None => trimmed,
    }
}

impl Drop for RawFrames {
    #[inline]
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop ffmpeg process: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}
