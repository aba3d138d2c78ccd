use std::env;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;

use image::RgbaImage;
use tracing::{debug, warn};

use super::{AssemblyError, EncodeSettings, VideoEncoder};

pub const FFMPEG_BINARY_ENV_VAR: &str = "TICKCAP_FFMPEG";

const DEFAULT_FFMPEG_BINARY: &str = "ffmpeg";
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FFMPEG_BINARY)
    }
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_env() -> Self {
        match env::var_os(FFMPEG_BINARY_ENV_VAR) {
            Some(value) if !value.is_empty() => Self::new(value),
            _ => Self::default(),
        }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    fn unavailable(&self, reason: impl Into<String>) -> AssemblyError {
        AssemblyError::EncodingUnavailable {
            encoder: self.binary.display().to_string(),
            reason: reason.into(),
        }
    }

    fn spawn(&self, settings: &EncodeSettings) -> Result<Child, AssemblyError> {
        Command::new(&self.binary)
            .args(encode_args(settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => self.unavailable("binary not found"),
                _ => AssemblyError::EncodingFailed {
                    message: format!("failed to start {}: {error}", self.binary.display()),
                },
            })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn locate(&self) -> Result<(), AssemblyError> {
        let status = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(self.unavailable(format!("`-version` exited with {status}"))),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(self.unavailable("binary not found"))
            }
            Err(error) => Err(self.unavailable(error.to_string())),
        }
    }

    fn encode(
        &self,
        settings: &EncodeSettings,
        frames: &mut dyn Iterator<Item = RgbaImage>,
    ) -> Result<u64, AssemblyError> {
        let mut child = self.spawn(settings)?;
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stderr.read_to_end(&mut buffer);
                buffer
            })
        });

        let mut written = 0u64;
        let mut write_error = None;
        if let Some(mut stdin) = child.stdin.take() {
            for frame in frames {
                if let Err(error) = stdin.write_all(frame.as_raw()) {
                    write_error = Some(error);
                    break;
                }
                written += 1;
            }
        }

        let status = child.wait().map_err(|error| AssemblyError::EncodingFailed {
            message: format!("failed to wait for ffmpeg: {error}"),
        })?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(AssemblyError::EncodingFailed {
                message: format!("ffmpeg exited with {status}: {}", stderr_tail(&stderr)),
            });
        }
        if let Some(error) = write_error {
            return Err(AssemblyError::EncodingFailed {
                message: format!("failed to stream frame {written} to ffmpeg: {error}"),
            });
        }
        if !stderr.is_empty() {
            warn!(stderr = %stderr_tail(&stderr), "ffmpeg_reported_warnings");
        }
        debug!(frames = written, output = %settings.output.display(), "ffmpeg_finished");
        Ok(written)
    }
}

fn encode_args(settings: &EncodeSettings) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(format!("{}x{}", settings.width, settings.height).into());
    args.push("-r".into());
    args.push(settings.fps.to_string().into());
    for arg in [
        "-i",
        "-",
        "-an",
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        // yuv420p needs even dimensions.
        "-vf",
        "pad=ceil(iw/2)*2:ceil(ih/2)*2",
    ] {
        args.push(arg.into());
    }
    args.push(settings.output.clone().into_os_string());
    args
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncodeSettings {
        EncodeSettings {
            fps: 60,
            width: 320,
            height: 181,
            output: PathBuf::from("out/animation_1.mp4"),
        }
    }

    #[test]
    fn args_describe_raw_rgba_input_and_h264_output() {
        let args: Vec<String> = encode_args(&settings())
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        let input = args.iter().position(|arg| arg == "-i").expect("input flag");
        assert_eq!(args[input + 1], "-");
        let size = args.iter().position(|arg| arg == "-s").expect("size flag");
        assert_eq!(args[size + 1], "320x181");
        let rate = args.iter().position(|arg| arg == "-r").expect("rate flag");
        assert_eq!(args[rate + 1], "60");
        assert!(size < input && rate < input);
        assert!(args.windows(2).any(|pair| pair == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|pair| pair == ["-pix_fmt", "yuv420p"]));
        assert_eq!(args.last().map(String::as_str), Some("out/animation_1.mp4"));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let encoder = FfmpegEncoder::new("definitely-not-an-ffmpeg-binary");
        assert!(matches!(
            encoder.locate(),
            Err(AssemblyError::EncodingUnavailable { .. })
        ));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = vec![b'a'; STDERR_TAIL_BYTES + 10];
        assert_eq!(stderr_tail(&long).len(), STDERR_TAIL_BYTES);
        assert_eq!(stderr_tail(b"  boom \n"), "boom");
    }
}
