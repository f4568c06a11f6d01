//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in the binary (every getter also calls it).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_err() {
            // Fallback to the crate root so `cargo run` from a subdirectory still works
            let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
            let _ = dotenv::from_filename(candidate);
        }
    });
}

/// Get required env var; error if missing or blank.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    env_opt(key).ok_or_else(|| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => parse_flag(&raw),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "on" | "yes")
}

/// Database URL for the apsviz database. `DATABASE_URL` wins; otherwise the
/// DSN is composed from the `APSVIZ_DB_*` components.
pub fn db_url() -> anyhow::Result<String> {
    if let Some(v) = env_opt("DATABASE_URL") {
        return Ok(v);
    }

    let host = env_opt("APSVIZ_DB_HOST");
    let user = env_opt("APSVIZ_DB_USERNAME");
    if let (Some(host), Some(user)) = (host, user) {
        let password = env_opt("APSVIZ_DB_PASSWORD");
        let database = env_opt("APSVIZ_DB_DATABASE").unwrap_or_else(|| "apsviz".into());
        let port: u16 = env_parse("APSVIZ_DB_PORT", 5432);
        let ssl_mode = env_opt("APSVIZ_DB_SSLMODE").unwrap_or_else(|| "prefer".into());

        let password = password.as_deref();
        if let Some(dsn) = compose_dsn(&host, &user, password, &database, port, &ssl_mode) {
            info!(target = "env", "using DSN composed from APSVIZ_DB_* variables");
            return Ok(dsn);
        }
    }

    Err(anyhow::anyhow!(
        "no database URL configured; set DATABASE_URL or APSVIZ_DB_HOST/APSVIZ_DB_USERNAME"
    ))
}

/// Build a postgres DSN through `url::Url` so credentials with reserved
/// characters (`@`, `?`, `!`) are percent-encoded.
pub fn compose_dsn(
    host: &str,
    user: &str,
    password: Option<&str>,
    database: &str,
    port: u16,
    ssl_mode: &str,
) -> Option<String> {
    let mut out = url::Url::parse("postgresql://localhost").ok()?;
    out.set_username(user).ok()?;
    if let Some(pass) = password {
        out.set_password(Some(pass)).ok()?;
    }

    let host_trimmed = host.trim().trim_matches(|c| c == '[' || c == ']');
    if host_trimmed.contains(':') {
        out.set_host(Some(&format!("[{host_trimmed}]"))).ok()?;
    } else {
        out.set_host(Some(host_trimmed)).ok()?;
    }

    out.set_port(Some(port)).ok()?;
    out.set_path(&format!("/{database}"));
    if ssl_mode != "disable" {
        out.query_pairs_mut().append_pair("sslmode", ssl_mode);
    }

    Some(out.to_string())
}

pub fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") {
        return "***".to_string();
    }

    let val_trim = val.trim();

    // Postgres DSNs carry credentials even when the key looks harmless.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }

    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();

    let snapshot: Vec<(String, String)> = required
        .iter()
        .chain(also_log)
        .map(|&k| {
            let v = env_opt(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");

    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}
