//! Video Thumber.
//!
//! `ffprobe` reports the duration of the first video stream; `ffmpeg` then
//! grabs a single frame from the midpoint, scaled to the requested width,
//! and pipes it back as JPEG. A failed probe is not fatal: the duration is
//! assumed to be one second.

use super::image::fit_image;
use super::process::Tool;
use super::{RenderContext, Size, ThumbError, Thumber, accept_mimes};
use crate::fs::Resource;
use image::{DynamicImage, ImageFormat};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const VIDEO_MIMES: &[&str] = &[
    "video/3gpp",
    "video/annodex",
    "video/dl",
    "video/dv",
    "video/fli",
    "video/gl",
    "video/mpeg",
    "video/MP2T",
    "video/mp4",
    "video/quicktime",
    "video/mp4v-es",
    "video/ogg",
    "video/parityfec",
    "video/pointer",
    "video/webm",
    "video/vnd.fvt",
    "video/vnd.motorola.video",
    "video/vnd.motorola.videop",
    "video/vnd.mpegurl",
    "video/vnd.mts",
    "video/vnd.nokia.interleaved-multimedia",
    "video/vnd.vivo",
    "video/x-flv",
    "video/x-la-asf",
    "video/x-mng",
    "video/x-ms-asf",
    "video/x-ms-wm",
    "video/x-ms-wmv",
    "video/x-ms-wmx",
    "video/x-ms-wvx",
    "video/x-msvideo",
    "video/x-sgi-movie",
    "video/x-matroska",
];

/// Assumed duration when probing fails.
const FALLBACK_DURATION: Duration = Duration::from_secs(1);

pub struct VideoThumber {
    ffmpeg: Tool,
    ffprobe: Tool,
    timeout: Duration,
}

impl VideoThumber {
    pub fn new(ffmpeg: Tool, ffprobe: Tool, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            timeout,
        }
    }

    /// `None` (and a warning) unless both `ffmpeg` and `ffprobe` are installed.
    pub fn locate(timeout: Duration) -> Option<Self> {
        let Some(ffmpeg) = Tool::locate("ffmpeg") else {
            warn!("Disabling video thumber, ffmpeg not found in PATH");
            return None;
        };
        let Some(ffprobe) = Tool::locate("ffprobe") else {
            warn!("Disabling video thumber, ffprobe not found in PATH");
            return None;
        };
        Some(Self::new(ffmpeg, ffprobe, timeout))
    }

    fn duration(&self, path: &Path) -> Result<Duration, ThumbError> {
        let out = self.ffprobe.run(
            [
                OsString::from("-v"),
                "error".into(),
                "-select_streams".into(),
                "v:0".into(),
                "-show_entries".into(),
                "stream=duration".into(),
                "-of".into(),
                "default=noprint_wrappers=1:nokey=1".into(),
                path.into(),
            ],
            self.timeout,
        )?;
        parse_duration(&String::from_utf8_lossy(&out)).ok_or_else(|| {
            ThumbError::Generation(format!(
                "ffprobe reported no duration for {}",
                path.display()
            ))
        })
    }

    fn frame_args(path: &Path, seek: Duration, size: Size) -> Vec<OsString> {
        vec![
            "-v".into(),
            "error".into(),
            "-ss".into(),
            format!("{:.3}", seek.as_secs_f64()).into(),
            "-i".into(),
            path.into(),
            "-vframes".into(),
            "1".into(),
            "-f".into(),
            "image2pipe".into(),
            "-c:v".into(),
            "mjpeg".into(),
            "-vf".into(),
            format!("scale={}:-2", size.width).into(),
            "-".into(),
        ]
    }
}

/// Parse `ffprobe`'s plain-number duration output, in seconds.
fn parse_duration(output: &str) -> Option<Duration> {
    let secs: f64 = output.lines().next()?.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

impl Thumber for VideoThumber {
    fn name(&self) -> &'static str {
        "video"
    }

    fn accepts(&self, resource: &Resource) -> Result<bool, ThumbError> {
        accept_mimes(resource, VIDEO_MIMES)
    }

    fn thumb(
        &self,
        resource: &Resource,
        size: Size,
        _ctx: &RenderContext<'_>,
    ) -> Result<DynamicImage, ThumbError> {
        let duration = self.duration(resource.path()).unwrap_or_else(|err| {
            warn!(path = %resource.path().display(), error = %err, "duration probe failed");
            FALLBACK_DURATION
        });

        let frame = self.ffmpeg.run(
            Self::frame_args(resource.path(), duration / 2, size),
            self.timeout,
        )?;
        let image = image::load_from_memory_with_format(&frame, ImageFormat::Jpeg)?;
        Ok(fit_image(image, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_probe_output() {
        assert_eq!(parse_duration("12.500000\n"), Some(Duration::from_millis(12500)));
        assert_eq!(parse_duration("3\n4\n"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0.0"), None);
    }

    #[test]
    fn frame_args_seek_and_scale() {
        let args = VideoThumber::frame_args(
            Path::new("/v/clip.mp4"),
            Duration::from_millis(2500),
            Size::new(140, 140),
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        let after = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(after("-ss"), "2.500");
        assert_eq!(after("-i"), "/v/clip.mp4");
        assert_eq!(after("-vframes"), "1");
        assert_eq!(after("-vf"), "scale=140:-2");
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn accepts_allow_listed_videos_only() {
        let tmp = TempDir::new().unwrap();
        let thumber = VideoThumber::new(
            Tool::at("ffmpeg", "/usr/bin/ffmpeg"),
            Tool::at("ffprobe", "/usr/bin/ffprobe"),
            Duration::from_secs(1),
        );
        for (name, expected) in [("clip.mp4", true), ("clip.mkv", true), ("clip.webm", true), ("song.mp3", false)] {
            let path = tmp.path().join(name);
            fs::write(&path, b"").unwrap();
            assert_eq!(
                thumber.accepts(&Resource::from_path(&path).unwrap()).unwrap(),
                expected,
                "{name}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn failed_probe_falls_back_to_one_second() {
        use crate::thumb::Registry;
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        // Fake ffmpeg that records its arguments and emits a tiny JPEG.
        let jpeg = tmp.path().join("frame.jpg");
        crate::test_helpers::create_test_jpeg(&jpeg, 16, 8);
        let log = tmp.path().join("args.log");
        let script = tmp.path().join("ffmpeg");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" > '{}'\ncat '{}'\n",
                log.display(),
                jpeg.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let thumber = VideoThumber::new(
            Tool::at("ffmpeg", &script),
            Tool::at("ffprobe", "/bin/false"),
            Duration::from_secs(10),
        );
        let video = tmp.path().join("clip.mp4");
        fs::write(&video, b"").unwrap();
        let registry = Registry::new();
        let image = thumber
            .thumb(
                &Resource::from_path(&video).unwrap(),
                Size::new(140, 140),
                &RenderContext::new(&registry),
            )
            .unwrap();

        assert_eq!((image.width(), image.height()), (16, 8));
        let logged = fs::read_to_string(&log).unwrap();
        assert!(logged.contains("-ss 0.500"), "{logged}");
    }
}
