//! Card Capture CLI
//!
//! Command-line interface for validating stills, simulating a capture
//! session against a scripted mock camera and draining the upload queue.

use card_capture::{
    capture::{
        CaptureStep, FileConfig, FrameSource, MockFrameSource, MockStillCamera, NoopFocus,
        SceneSegment,
    },
    dataset::{CaptureIdGenerator, FileCounter, Grade, StagingPaths},
    engine::{CaptureEngine, EngineEvent},
    metrics::{MetricsRegistry, MetricsSnapshot, QueueCounts},
    session::{SessionCommand, SessionEvent, SessionRuntime, SessionSetup},
    upload::{open_job_store, DirectoryTransport, UploadQueue, UploadWorker},
    validation::PhotoValidator,
};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type CliResult = Result<i32, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "card-capture", version, about = "Trading card auto-capture tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the photo validator on a saved still.
    Validate {
        file: PathBuf,
        #[arg(long, default_value = "front")]
        step: CaptureStep,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Drive a scripted mock camera through a full capture session.
    Simulate {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Frames the card stays in view per side.
        #[arg(long, default_value_t = 120)]
        frames: u32,
        /// Loop the script until Ctrl-C.
        #[arg(long)]
        continuous: bool,
        /// Dataset root for staged photos and the upload queue.
        #[arg(long, default_value = "capture-data")]
        out: PathBuf,
        #[arg(long, default_value = "simulator")]
        device: String,
        /// Grade given to every accepted photo.
        #[arg(long, default_value = "NM")]
        grade: Grade,
        /// Serve Prometheus metrics on this port.
        #[cfg(feature = "metrics")]
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Drain the upload queue once over HTTP.
    #[cfg(feature = "http")]
    Upload {
        /// Queue database; a `.json` path uses the JSON file store.
        #[arg(long)]
        queue: PathBuf,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        pin_cert: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Drain the upload queue once into a local directory.
    Export {
        /// Queue database; a `.json` path uses the JSON file store.
        #[arg(long)]
        queue: PathBuf,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Card Capture v{}", card_capture::VERSION);

    let result = match cli.command {
        Command::Validate { file, step, config } => validate(&file, step, config.as_deref()),
        Command::Simulate {
            config,
            frames,
            continuous,
            out,
            device,
            grade,
            #[cfg(feature = "metrics")]
            metrics_port,
        } => {
            let options = SimulateOptions {
                frames,
                continuous,
                out,
                device,
                grade,
                #[cfg(feature = "metrics")]
                metrics_port,
            };
            simulate(config.as_deref(), options)
        }
        #[cfg(feature = "http")]
        Command::Upload {
            queue,
            url,
            token,
            pin_cert,
            config,
        } => upload(&queue, url, token, pin_cert, config.as_deref()),
        Command::Export { queue, dir, config } => export(&queue, &dir, config.as_deref()),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<FileConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(FileConfig::from_file(path)?),
        None => Ok(FileConfig::default()),
    }
}

fn validate(file: &Path, step: CaptureStep, config: Option<&Path>) -> CliResult {
    let config = load_config(config)?;
    let validator = PhotoValidator::new(config.validation);
    let result = validator.validate_file(file, step);

    let verdict = if result.accepted { "ACCEPT" } else { "REJECT" };
    println!("{verdict} {result}");
    if let Some(hint) = result.reason.hint() {
        println!("hint: {hint}");
    }
    Ok(if result.accepted { 0 } else { 2 })
}

struct SimulateOptions {
    frames: u32,
    continuous: bool,
    out: PathBuf,
    device: String,
    grade: Grade,
    #[cfg(feature = "metrics")]
    metrics_port: Option<u16>,
}

fn simulate(config: Option<&Path>, options: SimulateOptions) -> CliResult {
    let config = load_config(config)?;
    let capture = config.capture;
    let fps = 30;

    let staging = StagingPaths::new(&options.out);
    staging.ensure_dirs()?;
    let queue_path = options.out.join("upload_queue.db");
    let counter = FileCounter::new(options.out.join("state").join("sequence"));

    let calibration = capture.bg_calib_need_frames + 10;
    let script = vec![
        SceneSegment::empty(calibration),
        SceneSegment::card(options.frames),
        SceneSegment::empty(calibration + 20),
        SceneSegment::card(options.frames),
        SceneSegment::empty(calibration),
    ];
    let total: u32 = script.iter().map(|s| s.frames).sum();
    let mut source = MockFrameSource::new(640, 480, fps, script).looping(options.continuous);

    let session = SessionRuntime::spawn(SessionSetup {
        engine: CaptureEngine::new(capture),
        ids: CaptureIdGenerator::new(&options.device, counter),
        staging,
        queue: UploadQueue::new(open_job_store(&queue_path)?),
        camera: Box::new(MockStillCamera::new(640, 480)),
        focus: Box::new(NoopFocus),
        validator: PhotoValidator::new(config.validation),
    })?;

    let registry = MetricsRegistry::new()?;
    start_metrics_server(&options, &registry);

    // Set up signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    info!(frames = total, continuous = options.continuous, "Simulating capture session");

    let mut sent = 0u32;
    while running.load(Ordering::SeqCst) && (options.continuous || sent < total) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame source stopped: {}", e);
                break;
            }
        };
        if !session.send_frame(frame) {
            break;
        }
        sent += 1;
        std::thread::sleep(Duration::from_millis(1000 / u64::from(fps)));

        handle_events(&session, &registry, options.grade);
        if sent % fps == 0 {
            update_metrics(&registry, session.stats(), &queue_path);
        }
    }

    std::thread::sleep(Duration::from_millis(500));
    handle_events(&session, &registry, options.grade);
    source.close();

    let worker = session.shutdown()?;
    let stats = worker.stats();
    update_metrics(&registry, stats, &queue_path);
    let counts = QueueCounts::of(worker.queue())?;

    info!(
        "Analyzed {} frames ({} skipped, {} dropped, {} obstructed): {} triggers, {} accepted, {} rejected, {} cards queued",
        stats.engine.frames_analyzed,
        stats.frames_skipped,
        stats.engine.frames_dropped,
        stats.engine.frames_obstructed,
        stats.engine.triggers,
        stats.photos_accepted,
        stats.photos_rejected,
        stats.cards_queued
    );
    println!(
        "queue: pending={} uploaded={} failed={}",
        counts.pending, counts.uploaded, counts.failed
    );
    Ok(0)
}

#[cfg(feature = "metrics")]
fn start_metrics_server(options: &SimulateOptions, registry: &MetricsRegistry) {
    if let Some(port) = options.metrics_port {
        let server = card_capture::metrics::MetricsServer::new(
            card_capture::metrics::MetricsServerConfig::with_port(port),
            registry.clone(),
        );
        let _server = server.spawn();
    }
}

#[cfg(not(feature = "metrics"))]
fn start_metrics_server(_options: &SimulateOptions, _registry: &MetricsRegistry) {}

fn handle_events<P, C, S>(session: &SessionRuntime<P, C, S>, registry: &MetricsRegistry, grade: Grade)
where
    P: card_capture::engine::TextScanner,
{
    while let Ok(event) = session.events().try_recv() {
        match event {
            SessionEvent::Engine(EngineEvent::Debug(snapshot)) => debug!("{snapshot}"),
            SessionEvent::Engine(EngineEvent::Hint(hint)) | SessionEvent::Hint(hint) => {
                info!("hint: {hint}")
            }
            SessionEvent::Engine(event) => info!(?event, "Engine event"),
            SessionEvent::PhotoAccepted { step, path } => {
                registry.record_validation(card_capture::ReasonCode::Ok);
                info!(step = %step, path = %path.display(), grade = %grade, "Photo accepted; grading");
                session.send(SessionCommand::Grade(grade));
            }
            SessionEvent::PhotoRejected { step, result } => {
                registry.record_validation(result.reason);
                warn!(step = %step, "Photo rejected: {}", result);
            }
            SessionEvent::CardQueued { job_id, record } => {
                info!(job = job_id, base_id = %record.base_id, grade = %record.final_grade, "Card queued");
            }
            other => info!(?other, "Session event"),
        }
    }
}

fn update_metrics(registry: &MetricsRegistry, stats: card_capture::session::SessionStats, queue_path: &Path) {
    let queue = open_job_store(queue_path)
        .ok()
        .and_then(|store| QueueCounts::of(&UploadQueue::new(store)).ok());
    registry.update(&MetricsSnapshot {
        session: stats,
        queue,
    });
}

#[cfg(feature = "http")]
fn upload(
    queue: &Path,
    url: Option<String>,
    token: Option<String>,
    pin_cert: Option<PathBuf>,
    config: Option<&Path>,
) -> CliResult {
    let mut upload = load_config(config)?.upload;
    if let Some(url) = url {
        upload.url = url;
    }
    if token.is_some() {
        upload.token = token;
    }
    if pin_cert.is_some() {
        upload.pinned_cert = pin_cert;
    }

    let transport = card_capture::upload::HttpUploader::new(&upload)?;
    let queue = UploadQueue::new(open_job_store(queue)?);
    let mut worker = UploadWorker::new(queue, transport, upload.max_retries, upload.batch_limit);
    let report = worker.drain()?;
    println!("{report}");
    Ok(if report.failed > 0 { 2 } else { 0 })
}

fn export(queue: &Path, dir: &Path, config: Option<&Path>) -> CliResult {
    let upload = load_config(config)?.upload;
    let queue = UploadQueue::new(open_job_store(queue)?);
    let mut worker = UploadWorker::new(
        queue,
        DirectoryTransport::new(dir),
        upload.max_retries,
        upload.batch_limit,
    );
    let report = worker.drain()?;
    println!("{report}");
    Ok(if report.failed > 0 { 2 } else { 0 })
}
