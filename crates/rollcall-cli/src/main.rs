use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::multipart::{Form, Part};
use rollcall_core::liveness::{EyePair, DEFAULT_EAR_THRESHOLD};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld daemon
    #[arg(long, global = true, default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

/// Where the photo comes from: a file, or a fresh local camera capture.
#[derive(Args)]
struct PhotoSource {
    /// Image file to upload
    #[arg(required_unless_present = "capture")]
    image: Option<PathBuf>,
    /// Capture from the local camera instead of reading a file
    #[arg(long, conflicts_with = "image")]
    capture: bool,
    /// V4L2 device used with --capture
    #[arg(long, default_value = "/dev/video0")]
    device: String,
    /// Frames discarded before the captured one
    #[arg(long, default_value_t = 4)]
    warmup: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from one photo
    Enroll {
        #[arg(short, long)]
        name: String,
        /// Numeric identity key
        #[arg(short, long)]
        user_id: String,
        /// Secondary id (PRN)
        #[arg(short, long)]
        prn: String,
        #[command(flatten)]
        photo: PhotoSource,
    },
    /// Identify the person in a photo
    Recognize {
        #[command(flatten)]
        photo: PhotoSource,
    },
    /// Ask the daemon to capture a photo from its camera
    Capture,
    /// Show daemon status
    Status,
    /// List local V4L2 capture devices
    Devices,
    /// Compute the eye aspect ratio from a JSON file of 68 landmarks
    EyeState {
        landmarks: PathBuf,
        #[arg(long, default_value_t = DEFAULT_EAR_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');
    tracing::debug!(url = base, "using rollcalld");

    match cli.command {
        Commands::Enroll {
            name,
            user_id,
            prn,
            photo,
        } => {
            tracing::info!(user_id = %user_id, "enrolling");
            let form = photo
                .form()
                .await?
                .text("name", name)
                .text("user_id", user_id)
                .text("prn_no", prn);
            let resp = client.post(format!("{base}/add_face")).multipart(form).send().await;
            let body = read_json(resp).await?;
            println!("{}", body["message"].as_str().unwrap_or("enrolled"));
            if let Some(photo) = body["face_image"].as_str() {
                println!("  photo: {photo}");
            }
        }
        Commands::Recognize { photo } => {
            let form = photo.form().await?;
            tracing::info!("recognizing");
            let resp = client.post(format!("{base}/recognize_face")).multipart(form).send().await;
            let body = read_json(resp).await?;
            match body.get("user_id") {
                Some(id) => println!(
                    "Matched {} (user {id}, PRN {}) similarity {:.3}",
                    body["name"].as_str().unwrap_or("?"),
                    body["prn_no"].as_str().unwrap_or("?"),
                    body["similarity"].as_f64().unwrap_or_default()
                ),
                None => println!("{}", body["message"].as_str().unwrap_or("No matching face found")),
            }
        }
        Commands::Capture => {
            let body = read_json(client.get(format!("{base}/capture_photo")).send().await).await?;
            println!("{}", body["file_path"].as_str().unwrap_or_default());
        }
        Commands::Status => {
            let body = read_json(client.get(format!("{base}/status")).send().await).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::EyeState { landmarks, threshold } => {
            let raw = tokio::fs::read_to_string(&landmarks)
                .await
                .with_context(|| format!("failed to read {}", landmarks.display()))?;
            let shape: Vec<(f32, f32)> = serde_json::from_str(&raw).context("expected a JSON array of [x, y] points")?;
            let Some(eyes) = EyePair::from_68_point(&shape) else {
                bail!("need 68 landmarks, got {}", shape.len());
            };
            println!("EAR {:.3}: {:?}", eyes.mean_ear(), eyes.classify(threshold));
        }
    }

    Ok(())
}

impl PhotoSource {
    async fn form(&self) -> Result<Form> {
        let path = match &self.image {
            Some(path) => path.clone(),
            None => {
                let device = self.device.clone();
                let warmup = self.warmup;
                let dir = std::env::temp_dir().join("rollcall");
                tracing::info!(device = %device, warmup, "capturing from local camera");
                let path =
                    tokio::task::spawn_blocking(move || rollcall_hw::capture_photo(&device, warmup, &dir)).await??;
                tracing::debug!(path = %path.display(), "capture saved");
                path
            }
        };
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Form::new().part("file", Part::bytes(bytes).file_name(file_name(&path))))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.jpg".to_string())
}

/// Decode a daemon response, turning `{"detail": ..}` errors into `Err`.
async fn read_json(resp: reqwest::Result<reqwest::Response>) -> Result<Value> {
    let resp = resp.context("rollcalld not reachable")?;
    let status = resp.status();
    tracing::debug!(%status, url = %resp.url(), "rollcalld response");
    let body: Value = resp.json().await.context("invalid response from rollcalld")?;
    if !status.is_success() {
        let detail = body["detail"].as_str().map(str::to_string).unwrap_or_else(|| body.to_string());
        bail!("rollcalld: {status}: {detail}");
    }
    Ok(body)
}
