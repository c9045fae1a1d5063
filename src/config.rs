use crate::lifecycle::ConfirmMode;
use crate::signing::{TokenTtl, DEFAULT_TTL_HOURS};

const PLACEHOLDER_SIGNING_KEY: &str =
    "CHANGE_ME_00000000000000000000000000000000000000000000000000000000";
const PLACEHOLDER_ADMIN_KEY: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Hex-encoded HMAC key for pickup tokens. Rotating it voids every
    /// outstanding QR code.
    pub signing_key: String,
    /// Staff key checked on every `/api/v1` request.
    pub admin_key: String,
    /// Same window is used to issue and to verify.
    pub token_ttl: TokenTtl,
    pub confirm_mode: ConfirmMode,
    /// Webhook URLs notified on parcel events.
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<String>,
    /// Allowed CORS origin for the front-desk dashboard.
    pub dashboard_origin: String,
    /// Pixel size of one QR module.
    pub qr_module_px: u32,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_env(|key| std::env::var(key).ok())
}

/// Build the config from an arbitrary variable lookup.
pub fn from_env<F>(var: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let production = var("PARCELDESK_ENV")
        .or_else(|| var("RUST_ENV"))
        .map(|m| m == "production")
        .unwrap_or(false);

    let signing_key = var("PARCELDESK_SIGNING_KEY").unwrap_or_else(|| PLACEHOLDER_SIGNING_KEY.into());
    if signing_key == PLACEHOLDER_SIGNING_KEY {
        if production {
            anyhow::bail!(
                "PARCELDESK_SIGNING_KEY is still the insecure placeholder. \
                 Generate one with `parceldesk keygen` before running in production."
            );
        }
        eprintln!("⚠️  PARCELDESK_SIGNING_KEY is not set; using an insecure development key.");
    }

    let admin_key = var("PARCELDESK_ADMIN_KEY").unwrap_or_else(|| PLACEHOLDER_ADMIN_KEY.into());
    if admin_key == PLACEHOLDER_ADMIN_KEY {
        if production {
            anyhow::bail!("PARCELDESK_ADMIN_KEY must be set in production.");
        }
        eprintln!("⚠️  PARCELDESK_ADMIN_KEY is not set; using an insecure placeholder.");
    }

    let ttl_hours: u32 = match var("PARCELDESK_TOKEN_TTL_HOURS") {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("PARCELDESK_TOKEN_TTL_HOURS must be a positive integer, got '{}'", v))?,
        None => DEFAULT_TTL_HOURS,
    };
    if ttl_hours == 0 {
        anyhow::bail!("PARCELDESK_TOKEN_TTL_HOURS must be greater than zero");
    }

    let confirm_mode = match var("PARCELDESK_CONFIRM_MODE") {
        Some(v) => v.parse()?,
        None => ConfirmMode::default(),
    };

    let webhook_urls: Vec<String> = var("PARCELDESK_WEBHOOK_URLS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    for raw in &webhook_urls {
        let parsed = url::Url::parse(raw)
            .map_err(|e| anyhow::anyhow!("invalid webhook URL '{}': {}", raw, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            anyhow::bail!("webhook URL '{}' must use http or https", raw);
        }
    }

    Ok(Config {
        port: var("PARCELDESK_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080),
        database_url: var("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/parceldesk".into()),
        db_max_connections: var("PARCELDESK_DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        signing_key: if signing_key == PLACEHOLDER_SIGNING_KEY {
            // 32 bytes of hex so the dev placeholder is still a usable key.
            "00".repeat(32)
        } else {
            signing_key
        },
        admin_key,
        token_ttl: TokenTtl::hours(ttl_hours),
        confirm_mode,
        webhook_urls,
        webhook_secret: var("PARCELDESK_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
        dashboard_origin: var("DASHBOARD_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000".to_string()),
        qr_module_px: var("PARCELDESK_QR_MODULE_PX")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8),
    })
}
