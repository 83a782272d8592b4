use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Option<Vec<String>>,
    pub version: String,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "getout".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "getout-users".into()),
            access_ttl_minutes: std::env::var("ACCESS_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(30),
            refresh_ttl_days: std::env::var("REFRESH_TOKEN_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
        };
        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| split_csv(&v))
            .unwrap_or_else(|_| vec!["*".into()]);
        let trusted_hosts = std::env::var("TRUSTED_HOSTS").ok().map(|v| split_csv(&v));
        let version = std::env::var("APP_VERSION").unwrap_or_else(|_| "dev".into());

        Ok(Self {
            database_url,
            jwt,
            cors_origins,
            trusted_hosts,
            version,
        })
    }
}
