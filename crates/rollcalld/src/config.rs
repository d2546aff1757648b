use rollcall_core::{FaceSelection, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Where vectors and identity records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Qdrant + SQLite.
    #[default]
    Persistent,
    /// In-process maps, lost on exit.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStoreKind {
    #[default]
    Local,
    Cloudinary,
    None,
}

impl FromStr for Backend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "persistent" => Ok(Self::Persistent),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for PhotoStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "local" => Ok(Self::Local),
            "cloudinary" => Ok(Self::Cloudinary),
            "none" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CloudinarySettings {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: Option<String>,
}

/// Daemon configuration: defaults, then the TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub backend: Backend,
    /// SQLite identity database.
    pub db_path: PathBuf,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    /// Cosine similarity at or above which the nearest neighbor is accepted.
    pub match_threshold: f32,
    pub secondary_id_pattern: String,
    pub face_policy: FaceSelection,
    /// V4L2 device used by `GET /capture_photo`.
    pub camera_device: String,
    /// Frames discarded before the captured one (auto-exposure settle).
    pub warmup_frames: usize,
    pub capture_dir: PathBuf,
    pub photo_store: PhotoStoreKind,
    pub photo_dir: PathBuf,
    pub cloudinary: CloudinarySettings,
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            model_dir: rollcall_core::default_model_dir(),
            backend: Backend::default(),
            db_path: data_dir.join("identities.db"),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            collection: "face_attendance".to_string(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            secondary_id_pattern: rollcall_core::validate::DEFAULT_SECONDARY_ID_PATTERN.to_string(),
            face_policy: FaceSelection::default(),
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            capture_dir: data_dir.join("captures"),
            photo_store: PhotoStoreKind::default(),
            photo_dir: data_dir.join("photos"),
            cloudinary: CloudinarySettings::default(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        check_threshold("match_threshold", config.match_threshold)?;
        Ok(config)
    }

    /// Apply `ROLLCALL_*` / `CLOUDINARY_*` overrides from `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let env = Env(&get);

        if let Some(v) = env.parsed("ROLLCALL_LISTEN")? {
            self.listen = v;
        }
        if let Some(v) = get("ROLLCALL_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = env.parsed("ROLLCALL_BACKEND")? {
            self.backend = v;
        }
        if let Some(v) = get("ROLLCALL_DB_PATH") {
            self.db_path = v.into();
        }
        if let Some(v) = get("ROLLCALL_QDRANT_URL") {
            self.qdrant_url = v;
        }
        if let Some(v) = get("ROLLCALL_QDRANT_API_KEY") {
            self.qdrant_api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = get("ROLLCALL_COLLECTION") {
            self.collection = v;
        }
        if let Some(v) = env.parsed("ROLLCALL_MATCH_THRESHOLD")? {
            self.match_threshold = check_threshold("ROLLCALL_MATCH_THRESHOLD", v)?;
        }
        if let Some(v) = get("ROLLCALL_SECONDARY_ID_PATTERN") {
            self.secondary_id_pattern = v;
        }
        if let Some(v) = env.parsed("ROLLCALL_FACE_POLICY")? {
            self.face_policy = v;
        }
        if let Some(v) = get("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = env.parsed("ROLLCALL_WARMUP_FRAMES")? {
            self.warmup_frames = v;
        }
        if let Some(v) = get("ROLLCALL_CAPTURE_DIR") {
            self.capture_dir = v.into();
        }
        if let Some(v) = env.parsed("ROLLCALL_PHOTO_STORE")? {
            self.photo_store = v;
        }
        if let Some(v) = get("ROLLCALL_PHOTO_DIR") {
            self.photo_dir = v.into();
        }
        if let Some(v) = get("CLOUDINARY_CLOUD_NAME") {
            self.cloudinary.cloud_name = v;
        }
        if let Some(v) = get("CLOUDINARY_API_KEY") {
            self.cloudinary.api_key = v;
        }
        if let Some(v) = get("CLOUDINARY_API_SECRET") {
            self.cloudinary.api_secret = v;
        }
        if let Some(v) = get("CLOUDINARY_FOLDER") {
            self.cloudinary.folder = Some(v);
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the SFace recognition model.
    pub fn sface_model_path(&self) -> String {
        self.model_dir
            .join("face_recognition_sface_2021dec.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

/// Cosine similarity lives in [-1, 1]; anything else never or always matches.
fn check_threshold(key: &'static str, value: f32) -> Result<f32, ConfigError> {
    if value.is_finite() && (-1.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parsed<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }
}
