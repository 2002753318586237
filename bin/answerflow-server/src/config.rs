//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::str::FromStr;

use answerflow_core::PipelineConfig;

/// Where task sets and answers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Graphql,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "graphql" => Ok(StoreBackend::Graphql),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Where objects live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBackend {
    Local,
    S3,
}

impl FromStr for BlobBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(BlobBackend::Local),
            "s3" => Ok(BlobBackend::S3),
            other => Err(format!("unknown blob backend '{other}'")),
        }
    }
}

/// Runtime configuration for answerflow-server.
///
/// Every field has a default so the server starts against a local SQLite
/// database and a local blob directory with no environment at all.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins. `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Bearer token required on `POST /v1/events/storage`. `None` disables the check.
    pub events_token: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json` (default: `true`).
    pub enable_api_docs: bool,

    pub store_backend: StoreBackend,
    /// SQLite URL (default: `"sqlite://answerflow.db"`).
    pub database_url: String,
    pub graphql_endpoint: String,
    pub graphql_api_secret: String,

    pub blob_backend: BlobBackend,
    /// Root directory for the local blob backend; one sub-directory per bucket.
    pub blob_root: PathBuf,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,

    /// Explicit ffmpeg/ffprobe binaries. `None` uses whatever is on `PATH`.
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,

    /// OpenAI-compatible transcription service base url.
    pub transcribe_endpoint: String,
    pub transcribe_model: String,
    pub transcribe_api_key: Option<String>,

    /// Orchestrator submission-queue capacity.
    pub queue_capacity: usize,

    /// Workflows driven at the same time.
    pub max_concurrent: usize,

    /// Largest mentor image accepted (default: 10 MiB).
    pub max_image_bytes: usize,

    pub pipeline: PipelineConfig,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_owned());
        let optional = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let defaults = PipelineConfig::default();
        let mut pipeline = PipelineConfig {
            min_video_duration_ms: parse_env(&var, "ANSWERFLOW_MIN_VIDEO_DURATION_MS", defaults.min_video_duration_ms),
            idle_question_name: env_or("ANSWERFLOW_IDLE_QUESTION_NAME", &defaults.idle_question_name),
            transcribe_timeout_secs: parse_env(&var, "ANSWERFLOW_TRANSCRIBE_TIMEOUT_SECS", defaults.transcribe_timeout_secs),
            transcribe_language: env_or("ANSWERFLOW_TRANSCRIBE_LANGUAGE", &defaults.transcribe_language),
            static_url_base: env_or("ANSWERFLOW_STATIC_URL_BASE", &defaults.static_url_base),
            max_upload_bytes: parse_env(&var, "ANSWERFLOW_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            upload_url_ttl_secs: parse_env(&var, "ANSWERFLOW_UPLOAD_URL_TTL_SECS", defaults.upload_url_ttl_secs),
            work_dir: optional("ANSWERFLOW_WORK_DIR").map(PathBuf::from),
            ..defaults
        };
        let buckets = &mut pipeline.buckets;
        buckets.upload = env_or("ANSWERFLOW_UPLOAD_BUCKET", &buckets.upload);
        buckets.static_assets = env_or("ANSWERFLOW_STATIC_BUCKET", &buckets.static_assets);
        buckets.transcribe_input = env_or("ANSWERFLOW_TRANSCRIBE_INPUT_BUCKET", &buckets.transcribe_input);
        buckets.transcribe_output = env_or("ANSWERFLOW_TRANSCRIBE_OUTPUT_BUCKET", &buckets.transcribe_output);
        pipeline.web.max_height = parse_env(&var, "ANSWERFLOW_WEB_MAX_HEIGHT", pipeline.web.max_height);
        pipeline.web.aspect = parse_env(&var, "ANSWERFLOW_WEB_ASPECT", pipeline.web.aspect);
        pipeline.mobile.target_size = parse_env(&var, "ANSWERFLOW_MOBILE_SIZE", pipeline.mobile.target_size);
        pipeline.mobile.landscape_zoom =
            parse_env(&var, "ANSWERFLOW_MOBILE_LANDSCAPE_ZOOM", pipeline.mobile.landscape_zoom);

        Self {
            bind_address: env_or("ANSWERFLOW_BIND", "0.0.0.0:3000"),
            log_level: env_or("ANSWERFLOW_LOG", "info"),
            log_json: flag("ANSWERFLOW_LOG_JSON"),
            cors_allowed_origins: optional("ANSWERFLOW_CORS_ORIGINS"),
            events_token: optional("ANSWERFLOW_EVENTS_TOKEN"),
            enable_api_docs: parse_env(&var, "ANSWERFLOW_ENABLE_API_DOCS", true),
            store_backend: parse_env(&var, "ANSWERFLOW_STORE", StoreBackend::Sqlite),
            database_url: env_or("ANSWERFLOW_DATABASE_URL", "sqlite://answerflow.db"),
            graphql_endpoint: env_or("ANSWERFLOW_GRAPHQL_ENDPOINT", "http://localhost:3001/graphql"),
            graphql_api_secret: env_or("ANSWERFLOW_GRAPHQL_API_SECRET", ""),
            blob_backend: parse_env(&var, "ANSWERFLOW_BLOB", BlobBackend::Local),
            blob_root: PathBuf::from(env_or("ANSWERFLOW_BLOB_ROOT", "./data")),
            s3_region: env_or("ANSWERFLOW_S3_REGION", "us-east-1"),
            s3_endpoint: optional("ANSWERFLOW_S3_ENDPOINT"),
            s3_access_key_id: env_or("ANSWERFLOW_S3_ACCESS_KEY_ID", ""),
            s3_secret_access_key: env_or("ANSWERFLOW_S3_SECRET_ACCESS_KEY", ""),
            ffmpeg_path: optional("ANSWERFLOW_FFMPEG").map(PathBuf::from),
            ffprobe_path: optional("ANSWERFLOW_FFPROBE").map(PathBuf::from),
            transcribe_endpoint: env_or("ANSWERFLOW_TRANSCRIBE_ENDPOINT", "http://localhost:8000"),
            transcribe_model: env_or("ANSWERFLOW_TRANSCRIBE_MODEL", "whisper-1"),
            transcribe_api_key: optional("ANSWERFLOW_TRANSCRIBE_API_KEY"),
            queue_capacity: parse_env(&var, "ANSWERFLOW_QUEUE_CAPACITY", 64),
            max_concurrent: parse_env(&var, "ANSWERFLOW_MAX_CONCURRENT", 4),
            max_image_bytes: parse_env(&var, "ANSWERFLOW_MAX_IMAGE_BYTES", 10 * 1024 * 1024),
            pipeline,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_env<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
