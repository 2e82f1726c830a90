use std::env;
use std::path::PathBuf;

/// 512 MiB; full archives carry every item image.
const DEFAULT_MAX_MESSAGE_BYTES: usize = 512 * 1024 * 1024;

#[derive(Clone, Debug)]
pub enum AssetBackend {
    Local {
        upload_dir: PathBuf,
    },
    R2 {
        bucket: String,
        account_id: String,
        access_key: String,
        secret_key: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Required by the server, unused by the CLI.
    pub jwt_secret: Option<String>,
    pub asset_backend: AssetBackend,
    pub staging_dir: Option<PathBuf>,
    pub max_message_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let asset_backend = match env::var("ASSET_BACKEND").as_deref() {
            Ok("r2") => AssetBackend::R2 {
                bucket: env::var("R2_BUCKET")?,
                account_id: env::var("R2_ACCOUNT_ID")?,
                access_key: env::var("R2_ACCESS_KEY_ID")?,
                secret_key: env::var("R2_SECRET_ACCESS_KEY")?,
            },
            _ => AssetBackend::Local {
                upload_dir: env::var("UPLOAD_DIR")
                    .unwrap_or_else(|_| "public".to_string())
                    .into(),
            },
        };

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/inventory.db".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "50051".to_string())
                .parse()
                .unwrap_or(50051),
            jwt_secret: env::var("JWT_SECRET").ok(),
            asset_backend,
            staging_dir: env::var("BACKUP_STAGING_DIR").ok().map(PathBuf::from),
            max_message_bytes: env::var("BACKUP_MAX_MESSAGE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
