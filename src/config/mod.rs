use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the complaint upload endpoint
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Bind host (default: "127.0.0.1")
    pub host: String,

    /// Bind port (default: 3000)
    pub port: u16,

    /// Directory archive entries are extracted under (default: "uploads/complaints")
    pub uploads_dir: PathBuf,

    /// Extraction is only allowed for entries resolving inside this root (default: ".")
    pub extraction_root: PathBuf,

    /// File whose overwrite through an archive solves the file write challenge
    pub protected_file: PathBuf,

    /// Where uploaded archives are staged before extraction (default: OS temp dir)
    pub temp_dir: PathBuf,

    /// Hard cap on a single uploaded file in bytes (default: 200 000)
    pub max_upload_size: usize,

    /// Uploads larger than this solve the upload size challenge (default: 100 000)
    pub size_challenge_threshold: usize,

    /// File types accepted without solving the upload type challenge
    pub allowed_file_types: Vec<String>,

    /// Wall-clock budget for parsing an uploaded XML document (default: 2 s)
    pub xml_parse_timeout: Duration,

    /// Maximum bytes produced by entity expansion (default: 16 MiB)
    pub xml_expansion_limit: usize,

    /// Resolve SYSTEM/PUBLIC entities against the local filesystem (default: true)
    pub xml_resolve_external: bool,

    /// Disable challenges that are unsafe in the detected runtime environment
    pub safety_mode: bool,

    /// Runtime environment name, e.g. "Docker" or "Heroku"
    pub runtime_env: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            uploads_dir: PathBuf::from("uploads/complaints"),
            extraction_root: PathBuf::from("."),
            protected_file: PathBuf::from("ftp/legal.md"),
            temp_dir: env::temp_dir(),
            max_upload_size: 200_000,
            size_challenge_threshold: 100_000,
            allowed_file_types: vec!["pdf".to_string(), "xml".to_string(), "zip".to_string()],
            xml_parse_timeout: Duration::from_millis(2000),
            xml_expansion_limit: 16 * 1024 * 1024, // 16 MiB
            xml_resolve_external: true,
            safety_mode: false,
            runtime_env: None,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            host: env::var("HOST").unwrap_or(default.host),

            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),

            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.uploads_dir),

            extraction_root: env::var("EXTRACTION_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.extraction_root),

            protected_file: env::var("PROTECTED_FILE")
                .map(PathBuf::from)
                .unwrap_or(default.protected_file),

            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.temp_dir),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            size_challenge_threshold: env::var("SIZE_CHALLENGE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.size_challenge_threshold),

            allowed_file_types: env::var("ALLOWED_FILE_TYPES")
                .map(|v| parse_file_types(&v))
                .unwrap_or(default.allowed_file_types),

            xml_parse_timeout: env::var("XML_PARSE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.xml_parse_timeout),

            xml_expansion_limit: env::var("XML_EXPANSION_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.xml_expansion_limit),

            xml_resolve_external: env::var("XML_RESOLVE_EXTERNAL")
                .map(|v| parse_flag(&v))
                .unwrap_or(default.xml_resolve_external),

            safety_mode: env::var("SAFETY_MODE")
                .map(|v| parse_flag(&v))
                .unwrap_or(default.safety_mode),

            runtime_env: env::var("RUNTIME_ENV")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or(default.runtime_env),
        }
    }

    /// Config for local development and tests: everything rooted in `root`
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            uploads_dir: root.join("uploads/complaints"),
            extraction_root: root.clone(),
            protected_file: root.join("ftp/legal.md"),
            temp_dir: root.join("tmp"),
            ..Self::default()
        }
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value != "false" && value != "0" && value != "no" && !value.is_empty()
}

fn parse_file_types(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|t| t.trim().trim_start_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
