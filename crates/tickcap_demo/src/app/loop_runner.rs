use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use thiserror::Error;
use tickcap::capture::{read_session_manifest, FrameFileError, ManifestReadState};
use tickcap::{
    AnimationAssembler, AssemblyError, CaptureError, CapturePaths, CaptureSummary, EncodeReport,
    FrameCaptureLoop, VideoEncoder,
};
use tracing::{error, info, warn};

use super::bootstrap::{AppWiring, Command};
use super::renderer::SoftwareRenderer;
use super::scenario::Scenario;
use super::world::{DemoWorld, SharedScene};

#[derive(Debug, Error)]
pub(crate) enum RunError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    FrameFiles(#[from] FrameFileError),
    #[error("no capture session manifest in {dir}")]
    ManifestMissing { dir: PathBuf },
    #[error("capture session manifest in {dir} is unreadable")]
    ManifestUnreadable { dir: PathBuf },
    #[error("capture stopped without reporting a summary")]
    SummaryMissing,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let result = match app.command {
        Command::Capture { .. } => run_capture(&app.scenario, &app.paths, app.encoder).map(|_| ()),
        Command::Encode => encode_existing(&app.paths, app.encoder).map(|_| ()),
    };
    if let Err(err) = result {
        error!(error = %err, "demo_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

pub(crate) fn run_capture(
    scenario: &Scenario,
    paths: &CapturePaths,
    encoder: Arc<dyn VideoEncoder>,
) -> Result<CaptureSummary, RunError> {
    let scene = SharedScene::new(scenario);
    let mut capture = FrameCaptureLoop::new(
        scenario.capture.clone(),
        scenario.region(),
        &paths.frames_dir,
    )?;
    let fps = u64::from(capture.timing().fps());

    let (encode_tx, encode_rx) = mpsc::channel();
    if scenario.capture.encode_on_completion {
        let assembler = AnimationAssembler::new(
            &paths.frames_dir,
            &paths.animations_dir,
            capture.timing().fps(),
            encoder,
        );
        capture = capture.with_assembler(assembler, move |result| {
            let _ = encode_tx.send(result);
        });
    }

    let world = DemoWorld::new(scene.clone(), capture.coordinator().clone())
        .with_hooks(capture.block_tracker().clone());
    let renderer = SoftwareRenderer::new(scene, &paths.staging_dir);
    let (summary_tx, summary_rx) = mpsc::channel();
    capture.start(Box::new(world), Box::new(renderer), move |summary| {
        let _ = summary_tx.send(summary);
    })?;

    let progress = capture.progress();
    let mut last_logged = None;
    while capture.pump() {
        let snapshot = progress.snapshot();
        if snapshot.frame_index % fps == 0 && last_logged != Some(snapshot.frame_index) {
            last_logged = Some(snapshot.frame_index);
            info!(
                frame_index = snapshot.frame_index,
                total_frames = snapshot.total_frames,
                current_tick = snapshot.current_tick,
                percent = (snapshot.fraction_complete() * 100.0).round() as u32,
                "capture_progress"
            );
        }
    }

    let summary = summary_rx
        .try_recv()
        .map_err(|_| RunError::SummaryMissing)?;
    if let Some(job) = capture.take_encode_job() {
        if !job.join() {
            warn!("encode_worker_panicked");
        }
        match encode_rx.try_recv() {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err(error)) => warn!(error = %error, "animation_not_written"),
            Err(_) => warn!("encode_result_missing"),
        }
    }
    Ok(summary)
}

pub(crate) fn encode_existing(
    paths: &CapturePaths,
    encoder: Arc<dyn VideoEncoder>,
) -> Result<EncodeReport, RunError> {
    let manifest = match read_session_manifest(&paths.frames_dir)? {
        ManifestReadState::Present(manifest) => manifest,
        ManifestReadState::Missing => {
            return Err(RunError::ManifestMissing {
                dir: paths.frames_dir.clone(),
            })
        }
        ManifestReadState::Unreadable => {
            return Err(RunError::ManifestUnreadable {
                dir: paths.frames_dir.clone(),
            })
        }
    };
    if !manifest.completed {
        warn!(
            frames_produced = manifest.frames_produced,
            total_frames = manifest.total_frames,
            "encoding_incomplete_capture"
        );
    }

    let assembler = AnimationAssembler::new(
        &paths.frames_dir,
        &paths.animations_dir,
        manifest.fps,
        encoder,
    );
    let report = assembler.encode_blocking(manifest.total_frames)?;
    log_report(&report);
    Ok(report)
}

fn log_report(report: &EncodeReport) {
    info!(
        output = %report.output.display(),
        frames_encoded = report.frames_encoded,
        missing_frames = report.missing_frames.len(),
        width = report.width,
        height = report.height,
        "animation_written"
    );
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    use image::RgbaImage;
    use tickcap::capture::frame_path;
    use tickcap::{capture_paths_at, EncodeSettings};

    use super::*;

    #[derive(Default)]
    struct CountingEncoder {
        frames: AtomicU64,
    }

    impl VideoEncoder for CountingEncoder {
        fn name(&self) -> &str {
            "counting"
        }

        fn locate(&self) -> Result<(), AssemblyError> {
            Ok(())
        }

        fn encode(
            &self,
            settings: &EncodeSettings,
            frames: &mut dyn Iterator<Item = RgbaImage>,
        ) -> Result<u64, AssemblyError> {
            let count = frames.count() as u64;
            self.frames.fetch_add(count, Ordering::Relaxed);
            fs::write(&settings.output, b"video").map_err(|error| {
                AssemblyError::EncodingFailed {
                    message: error.to_string(),
                }
            })?;
            Ok(count)
        }
    }

    fn small_scenario(encode_on_completion: bool) -> Scenario {
        let mut scenario = Scenario::default();
        scenario.capture.fps = 20;
        scenario.capture.duration_seconds = 0.2;
        scenario.capture.area.scale = 4.0;
        scenario.capture.encode_on_completion = encode_on_completion;
        scenario
    }

    #[test]
    fn capture_runs_to_completion_and_encodes() {
        let temp = tempfile::tempdir().expect("temp");
        let paths = capture_paths_at(temp.path()).expect("paths");
        let encoder = Arc::new(CountingEncoder::default());

        let summary =
            run_capture(&small_scenario(true), &paths, encoder.clone()).expect("capture");

        assert!(summary.completed);
        assert_eq!(summary.total_frames, 4);
        assert_eq!(summary.frames_produced, 4);
        assert!(summary.encode_started);
        assert_eq!(encoder.frames.load(Ordering::Relaxed), 4);
        for index in 0..4 {
            assert!(frame_path(&paths.frames_dir, index).is_file());
        }
        let videos = fs::read_dir(&paths.animations_dir).expect("animations").count();
        assert_eq!(videos, 1);
    }

    #[test]
    fn encode_uses_the_session_manifest() {
        let temp = tempfile::tempdir().expect("temp");
        let paths = capture_paths_at(temp.path()).expect("paths");
        let encoder = Arc::new(CountingEncoder::default());
        run_capture(&small_scenario(false), &paths, encoder.clone()).expect("capture");
        assert_eq!(encoder.frames.load(Ordering::Relaxed), 0);

        let report = encode_existing(&paths, encoder.clone()).expect("encode");
        assert_eq!(report.frames_encoded, 4);
        assert_eq!(report.fps, 20);
        assert!(report.missing_frames.is_empty());
    }

    #[test]
    fn encode_without_a_capture_reports_missing_manifest() {
        let temp = tempfile::tempdir().expect("temp");
        let paths = capture_paths_at(temp.path()).expect("paths");

        assert!(matches!(
            encode_existing(&paths, Arc::new(CountingEncoder::default())),
            Err(RunError::ManifestMissing { .. })
        ));
    }
}
