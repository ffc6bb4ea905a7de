use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_capture::DetectionLoop;
use rollcall_core::api::AttendanceRecord;
use rollcall_core::{EncodedImage, Period};
use std::path::PathBuf;
use std::time::Duration;

mod client;
mod session;

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-based classroom attendance", version)]
struct Cli {
    /// rollcalld base URL
    #[arg(long, global = true, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Per-request timeout in seconds; finalizing an enrollment extracts
    /// every photo before answering
    #[arg(long, global = true, env = "ROLLCALL_REQUEST_TIMEOUT_SECS", default_value_t = 600)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct CameraArgs {
    /// Camera to use: a V4L2 device path or "synthetic"
    #[arg(long, env = "ROLLCALL_CAMERA", default_value = session::SYNTHETIC_CAMERA)]
    camera: String,
    /// Face detection polling interval in milliseconds
    #[arg(long, env = "ROLLCALL_POLL_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,
    /// Out-of-range margin in percent of the frame
    #[arg(long, default_value_t = 15.0)]
    margin: f32,
}

impl CameraArgs {
    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(50))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the live face detection state from the camera
    Watch {
        #[command(flatten)]
        camera: CameraArgs,
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Enroll a student from existing photo files
    Enroll {
        /// Student name
        #[arg(short, long)]
        name: String,
        /// Photo files, one per enrollment slot
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Enroll a student by capturing photos from the camera
    CaptureEnroll {
        /// Student name
        #[arg(short, long)]
        name: String,
        /// Number of photos to capture
        #[arg(long, default_value_t = 10)]
        photos: u32,
        /// Seconds to wait for a well-framed face before each photo
        #[arg(long, default_value_t = 30)]
        ready_timeout: u64,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Recognize a class photo and record attendance
    TakeAttendance {
        /// Class period (default: derived from the current time)
        #[arg(short, long)]
        period: Option<String>,
        /// Use this image instead of capturing from the camera
        #[arg(long)]
        image: Option<PathBuf>,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Show attendance records
    Report {
        /// Date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Only this period
        #[arg(long)]
        period: Option<String>,
        /// Show the most recent N records instead
        #[arg(long, conflicts_with_all = ["date", "period"])]
        recent: Option<u32>,
    },
    /// Show daemon status and today's statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.url, Duration::from_secs(cli.timeout_secs.max(1)))?;

    match cli.command {
        Commands::Watch { camera, seconds } => watch(&cli.url, &camera, seconds).await,
        Commands::Enroll { name, photos } => enroll_files(&client, &name, &photos).await,
        Commands::CaptureEnroll {
            name,
            photos,
            ready_timeout,
            camera,
        } => {
            let ready_timeout = Duration::from_secs(ready_timeout);
            capture_enroll(&client, &name, photos, ready_timeout, &camera).await
        }
        Commands::TakeAttendance { period, image, camera } => {
            take_attendance(&client, period, image, &camera).await
        }
        Commands::Report { date, period, recent } => report(&client, date, period, recent).await,
        Commands::Status => status(&client).await,
    }
}

/// Open the camera and hand it to a running detection loop.
fn start_camera(url: &str, camera: &CameraArgs) -> Result<DetectionLoop> {
    let mut detection = session::detection_loop(url, camera.interval(), camera.margin)?;
    detection
        .start_detection(session::open_camera(&camera.camera)?)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(detection)
}

async fn watch(url: &str, camera: &CameraArgs, seconds: Option<u64>) -> Result<()> {
    let mut detection = start_camera(url, camera)?;
    let mut rx = detection.subscribe();

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    println!("Watching camera {} (Ctrl-C to stop)", camera.camera);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let result = rx.borrow_and_update().clone();
                match result.bounding_box {
                    Some(b) => println!(
                        "{} (faces: {}, box: {:.0},{:.0} {:.0}x{:.0})",
                        session::describe(&result), result.face_count, b.x, b.y, b.width, b.height
                    ),
                    None => println!("{}", session::describe(&result)),
                }
            }
        }
    }

    detection.stop_detection().await;
    println!("Camera released");
    Ok(())
}

async fn enroll_files(client: &DaemonClient, name: &str, photos: &[PathBuf]) -> Result<()> {
    for (i, path) in photos.iter().enumerate() {
        let slot = i as u32 + 1;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let resp = client.store_photo(name, &EncodedImage::new(bytes), slot).await?;
        println!(
            "Stored photo {slot}/{} -> {}",
            photos.len(),
            resp.file_path.unwrap_or_default()
        );
    }
    finalize(client, name, photos.len() as u32).await
}

async fn capture_enroll(
    client: &DaemonClient,
    name: &str,
    count: u32,
    ready_timeout: Duration,
    camera: &CameraArgs,
) -> Result<()> {
    let mut detection = start_camera(client.base_url(), camera)?;

    println!("Look at the camera; each photo is taken once your face is centered.");
    let captured = session::capture_series(
        &detection,
        count,
        ready_timeout,
        Duration::from_millis(500),
        move |slot, photo| async move {
            client.store_photo(name, &photo, slot).await?;
            println!("Captured photo {slot}/{count}");
            Ok(())
        },
    )
    .await;

    detection.stop_detection().await;
    captured?;
    finalize(client, name, count).await
}

async fn finalize(client: &DaemonClient, name: &str, count: u32) -> Result<()> {
    println!("Extracting features for {name}...");
    let resp = client.extract_features(name, count).await?;
    println!(
        "Registered {name}: {}/{} photos usable",
        resp.valid_photos.unwrap_or(0),
        resp.total_photos.unwrap_or(count)
    );
    Ok(())
}

async fn take_attendance(
    client: &DaemonClient,
    period: Option<String>,
    image: Option<PathBuf>,
    camera: &CameraArgs,
) -> Result<()> {
    let period = match period {
        Some(p) => Period::new(p).context("invalid period")?,
        None => Period::current(),
    };

    let photo = match image {
        Some(path) => EncodedImage::new(
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => capture_group_photo(client, camera).await?,
    };

    let resp = client.recognize_group(&photo, period.as_str()).await?;
    let Some(faces) = resp.faces_detected else {
        println!("{period}: no students enrolled, nothing recorded");
        return Ok(());
    };
    println!(
        "{period}: {faces} face(s) detected, {} recognized, {} newly recorded",
        resp.recognized_students.len(),
        resp.attendance_count.unwrap_or(0)
    );
    for student in &resp.recognized_students {
        println!("  {:<24} {:>5.1}%", student.name, student.confidence * 100.0);
    }
    Ok(())
}

/// One still from the camera; a group photo does not wait for a framed face.
async fn capture_group_photo(client: &DaemonClient, camera: &CameraArgs) -> Result<EncodedImage> {
    let mut detection = start_camera(client.base_url(), camera)?;
    let photo = detection.capture_photo().await;
    detection.stop_detection().await;
    photo.context("failed to capture group photo")
}

async fn report(
    client: &DaemonClient,
    date: Option<String>,
    period: Option<String>,
    recent: Option<u32>,
) -> Result<()> {
    let records = match recent {
        Some(limit) => client.recent(limit).await?,
        None => client.attendance(date.as_deref(), period.as_deref()).await?,
    };
    if records.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    print_records(&records);
    Ok(())
}

fn print_records(records: &[AttendanceRecord]) {
    println!("{:<24} {:<10} {:<10} {:<8} {:>6}", "STUDENT", "DATE", "PERIOD", "TIME", "CONF");
    for r in records {
        println!(
            "{:<24} {:<10} {:<10} {:<8} {:>5.1}%",
            r.student_name,
            r.date,
            r.period,
            r.time,
            r.confidence * 100.0
        );
    }
}

async fn status(client: &DaemonClient) -> Result<()> {
    let health = match client.health().await {
        Ok(health) => health,
        Err(e) => bail!("rollcalld: not connected ({e})"),
    };
    let stats = client.stats().await?;
    println!("rollcalld: {} at {}", health.status, client.base_url());
    println!("recognizer: {}", health.recognizer);
    println!("students: {}", stats.total_students);
    println!(
        "present today: {} ({}%)",
        stats.today_attendance, stats.attendance_rate
    );
    println!("current period: {}", stats.current_period);
    Ok(())
}
