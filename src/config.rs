use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Shared secret for admin bearer tokens.
    pub jwt_secret: String,
    pub dev_mode: bool,
    pub rate_limit_standard_rpm: u32,
    pub rate_limit_relaxed_rpm: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("MARKFILLER_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        // A missing secret in production would silently accept nothing, so
        // fall back to a loud dev-only default instead of an empty string.
        let jwt_secret = env::var("MARKFILLER_JWT_SECRET")
            .unwrap_or_else(|_| "markfiller-dev-secret-do-not-deploy".to_string());
        // jwt-simple rejects HS256 keys below 96 bits; fail at startup
        // instead of on the first admin request.
        assert!(
            jwt_secret.len() >= 12,
            "MARKFILLER_JWT_SECRET must be at least 12 bytes"
        );

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "markfiller.db".to_string()),
            jwt_secret,
            dev_mode,
            rate_limit_standard_rpm: env::var("RATE_LIMIT_STANDARD_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            rate_limit_relaxed_rpm: env::var("RATE_LIMIT_RELAXED_RPM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
