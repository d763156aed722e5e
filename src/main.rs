use facegate::{
    camera::{self, CameraGuard, CameraProvider, V4lCameraProvider},
    cli::{clear_screen, AsciiRenderer},
    common::{paths, Config, FaceGateError},
    core::{
        AuthenticationController, AuthenticationState, ControlPlane, FaceBox, FaceEncoder,
        OnnxFaceEncoder, PreviewFrame, ReferenceStore, SessionEnd, SessionSettings, StatusEvent,
        Subscriber,
    },
};

use clap::{Parser, Subcommand};
use anyhow::{Context as _, Result};
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const CAPTURE_ATTEMPTS: u32 = 30;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(about = "Camera-based face unlock gate")]
struct Cli {
    /// Config file (defaults to configs/face-gate.toml, then /etc/facegate)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging with file, line and thread
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List video devices
    DetectCamera,
    /// Capture a new reference photo
    CaptureReference {
        /// Where to save it (defaults to the configured reference path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check reference, models and camera
    Check,
    /// Run one authentication session
    Unlock {
        /// Give up after this many seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
        /// Draw preview frames in the terminal
        #[arg(long, conflicts_with = "json")]
        ascii: bool,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = || -> Result<Config> {
        Ok(match &cli.config {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        })
    };

    match cli.command {
        Commands::DetectCamera => detect_camera()?,
        Commands::CaptureReference { output } => {
            let config = config()?;
            let output = output.unwrap_or_else(|| config.reference.image_path.clone());
            capture_reference(&config, &output)?;
        }
        Commands::Check => {
            if !check(&config()?) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Unlock { timeout, ascii, json } => {
            let config = config()?;
            let mode = if json {
                OutputMode::Json
            } else if ascii {
                OutputMode::Ascii(AsciiRenderer::new(None, None))
            } else {
                OutputMode::Plain
            };

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            let granted = runtime.block_on(unlock(&config, Duration::from_secs(timeout), mode))?;
            println!("Authentication: {}", if granted { "SUCCESS" } else { "FAILED" });
            if !granted {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

enum OutputMode {
    Plain,
    Json,
    Ascii(AsciiRenderer),
}

/// Prints gate events as they reach the control plane.
struct TerminalSubscriber {
    mode: OutputMode,
    authenticated: bool,
    ended: Option<SessionEnd>,
    frames: u64,
}

impl TerminalSubscriber {
    fn new(mode: OutputMode) -> Self {
        Self { mode, authenticated: false, ended: None, frames: 0 }
    }

    fn finished(&self) -> bool {
        self.authenticated || self.ended.is_some()
    }

    fn emit_json(kind: &str, payload: serde_json::Value) {
        let line = serde_json::json!({
            "event": kind,
            "at": chrono::Local::now().to_rfc3339(),
            "data": payload,
        });
        println!("{}", line);
    }
}

impl Subscriber for TerminalSubscriber {
    fn on_status_change(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
        match &self.mode {
            OutputMode::Json => {
                Self::emit_json("status", to_json(&StatusEvent { authenticated }));
            }
            _ => println!("🔓 Face recognized, access granted"),
        }
    }

    fn on_frame(&mut self, frame: PreviewFrame) {
        self.frames += 1;
        match &self.mode {
            OutputMode::Plain => {}
            OutputMode::Json => {
                let mut payload = to_json(&frame);
                payload["jpeg_base64"] = serde_json::Value::String(frame.to_base64());
                Self::emit_json("frame", payload);
            }
            OutputMode::Ascii(renderer) => {
                match image::load_from_memory(&frame.jpeg) {
                    Ok(image) => {
                        let banner = format!(" frame {} - look at the camera ", frame.sequence);
                        if clear_screen().is_ok() {
                            println!("{}", renderer.render(&image, &banner));
                        }
                    }
                    Err(e) => tracing::debug!("Preview decode failed: {}", e),
                }
            }
        }
    }

    fn on_session_end(&mut self, end: SessionEnd) {
        if let OutputMode::Json = self.mode {
            Self::emit_json("session_end", to_json(&end));
        } else if !matches!(end, SessionEnd::Matched { .. }) {
            println!("Session ended: {:?} after {} preview frames", end, self.frames);
        }
        self.ended = Some(end);
    }
}

async fn unlock(config: &Config, timeout: Duration, mode: OutputMode) -> Result<bool> {
    let encoder: Arc<dyn FaceEncoder> = Arc::new(OnnxFaceEncoder::new(config)?);
    let reference = ReferenceStore::load_optional(&config.reference.image_path, encoder.as_ref());
    let cameras = Arc::new(V4lCameraProvider::new(&config.camera));

    let (mut plane, handoff) = ControlPlane::new(TerminalSubscriber::new(mode));
    let controller = AuthenticationController::new(
        reference,
        encoder,
        cameras,
        SessionSettings::from(config),
        handoff,
    );

    controller.start().context("Failed to start authentication")?;
    println!("Look at the camera...");

    let finished = tokio::time::timeout(timeout, plane.run_until(|s| s.finished())).await;
    if finished.is_err() {
        tracing::warn!("No match within {:?}, stopping", timeout);
        controller.stop();
    }

    // Bounded by one in-flight frame
    if let Some(report) = controller.join_worker() {
        tracing::info!(
            "Session: {:?}, {} frames, {} extractions",
            report.end, report.frames, report.extractions
        );
    }
    plane.run_pending();

    Ok(controller.state() == AuthenticationState::Authenticated)
}

fn detect_camera() -> Result<()> {
    println!("🔍 Detecting available cameras...\n");

    let cameras = camera::v4l2::list_all_cameras()?;
    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    for camera in &cameras {
        println!("📷 /dev/video{}: {}", camera.index, camera.name);
        for feature in &camera.features {
            println!("   - {}", feature);
        }
        println!();
    }

    let selected = camera::v4l2::detect_ir_camera()?;
    println!("═══════════════════════════════════════════════════════");
    println!("Auto-detect (device_index = {}) would use /dev/video{}", camera::v4l2::AUTO_DETECT_INDEX, selected);
    println!("\n📝 To pin a camera, set in the config:");
    println!("   [camera]");
    println!("   device_index = <NUMBER>");
    Ok(())
}

/// Reads frames until one decodes, skipping warm-up hiccups.
fn grab_frame(camera: &mut CameraGuard) -> facegate::Result<DynamicImage> {
    for _ in 0..CAPTURE_ATTEMPTS {
        match camera.read_frame() {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => break,
            Err(e) if e.is_transient() => tracing::debug!("Retrying capture: {}", e),
            Err(e) => return Err(e),
        }
    }
    Err(FaceGateError::FatalDevice("Camera produced no usable frame".into()))
}

fn capture_reference(config: &Config, output: &Path) -> Result<()> {
    let encoder = OnnxFaceEncoder::new(config)?;
    let provider = V4lCameraProvider::new(&config.camera);
    let mut camera = CameraGuard::new(provider.open(config.camera.device_index)?);

    println!("Look directly at the camera, make sure your face is well lit...");
    let frame = grab_frame(&mut camera)?;
    camera.release();

    let faces = encoder.encode(&frame.to_rgb8())?;
    match faces.len() {
        0 => anyhow::bail!(FaceGateError::NoFaceDetected),
        1 => {}
        n => println!("⚠️  {} faces in view; the first one will be used for matching", n),
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if output.exists() {
        let backup = paths::reference_backup_path(output);
        std::fs::rename(output, &backup)?;
        println!("Previous reference moved to {:?}", backup);
    }

    frame.save(output)?;
    println!("✓ Reference photo saved to {:?} ({}x{})", output, frame.width(), frame.height());
    Ok(())
}

/// Draws every detected face, the one used for matching in green.
fn annotate_faces(image: &DynamicImage, faces: &[FaceBox]) -> DynamicImage {
    let mut img = image.to_rgb8();
    let (width, height) = (img.width() as f32, img.height() as f32);

    for (idx, face) in faces.iter().enumerate().rev() {
        let color = if idx == 0 { Rgb([0, 255, 0]) } else { Rgb([255, 255, 0]) };
        let x1 = face.x1.clamp(0.0, width) as i32;
        let y1 = face.y1.clamp(0.0, height) as i32;
        let w = (face.x2.min(width) - face.x1.max(0.0)).max(1.0) as u32;
        let h = (face.y2.min(height) - face.y1.max(0.0)).max(1.0) as u32;

        draw_hollow_rect_mut(&mut img, Rect::at(x1, y1).of_size(w, h), color);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(&mut img, Rect::at(x1 + 1, y1 + 1).of_size(w - 2, h - 2), color);
        }
    }

    DynamicImage::ImageRgb8(img)
}

fn check(config: &Config) -> bool {
    let mut healthy = true;
    let ref_path = &config.reference.image_path;

    println!("1. Reference image: {:?}", ref_path);
    let reference_image = match image::open(ref_path) {
        Ok(img) => {
            println!("   ✓ Readable: {}x{} pixels", img.width(), img.height());
            Some(img)
        }
        Err(e) => {
            println!("   ✗ Not usable: {}", e);
            println!("   → Run 'facegate capture-reference' to create it");
            healthy = false;
            None
        }
    };

    println!("\n2. Models");
    for path in [&config.models.detector_path, &config.models.recognizer_path] {
        if path.exists() {
            println!("   ✓ {:?}", path);
        } else {
            println!("   ✗ {:?} missing", path);
            healthy = false;
        }
    }

    println!("\n3. Reference encoding");
    match (OnnxFaceEncoder::new(config), &reference_image) {
        (Ok(encoder), Some(img)) => match encoder.encode(&img.to_rgb8()) {
            Ok(faces) if faces.is_empty() => {
                println!("   ✗ No face found in reference image");
                healthy = false;
            }
            Ok(faces) => {
                println!("   ✓ {} face(s); the first is the reference", faces.len());
                let boxes: Vec<FaceBox> = faces.into_iter().map(|f| f.location).collect();
                let annotated_path = paths::annotated_reference_path(ref_path);
                match annotate_faces(img, &boxes).save(&annotated_path) {
                    Ok(()) => println!("   Annotated copy: {:?}", annotated_path),
                    Err(e) => tracing::warn!("Could not save annotated reference: {}", e),
                }
            }
            Err(e) => {
                println!("   ✗ Encoding failed: {}", e);
                healthy = false;
            }
        },
        (Err(e), _) => {
            println!("   ✗ Encoder unavailable: {}", e);
            healthy = false;
        }
        (Ok(_), None) => println!("   - Skipped"),
    }

    println!("\n4. Camera {}", config.camera.device_index);
    let provider = V4lCameraProvider::new(&config.camera);
    match provider.open(config.camera.device_index) {
        Ok(camera) => {
            let mut camera = CameraGuard::new(camera);
            match grab_frame(&mut camera) {
                Ok(frame) => println!("   ✓ Camera working ({}x{})", frame.width(), frame.height()),
                Err(e) => {
                    println!("   ✗ Camera opened but cannot read frames: {}", e);
                    healthy = false;
                }
            }
        }
        Err(e) => {
            println!("   ✗ {}", e);
            healthy = false;
        }
    }

    println!("\n═══════════════════════════════════════════════════════");
    println!("{}", if healthy { "Everything looks good." } else { "Problems found, see above." });
    healthy
}
