use std::env;

use rust_decimal::Decimal;

/// Tunable allocation policy. Defaults match the production constants
/// (5% tolerance, 24h duplicate window, 180-day recency cap).
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPolicy {
    pub amount_tolerance_percent: Decimal,
    pub duplicate_window_hours: i64,
    pub max_payment_age_days: i64,
    pub rent_due_day: u32,
    pub large_prepayment_months: u32,
    pub very_large_prepayment_months: u32,
    pub max_prepayment_months: u32,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance_percent: Decimal::from(5),
            duplicate_window_hours: 24,
            max_payment_age_days: 180,
            rent_due_day: 1,
            large_prepayment_months: 6,
            very_large_prepayment_months: 12,
            max_prepayment_months: 120,
        }
    }
}

impl AllocationPolicy {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            amount_tolerance_percent: env_opt("AMOUNT_TOLERANCE_PERCENT")
                .and_then(|raw| raw.parse::<Decimal>().ok())
                .filter(|value| !value.is_sign_negative())
                .unwrap_or(defaults.amount_tolerance_percent),
            duplicate_window_hours: env_parse_or(
                "DUPLICATE_WINDOW_HOURS",
                defaults.duplicate_window_hours,
            )
            .clamp(0, 24 * 366),
            max_payment_age_days: env_parse_or(
                "MAX_PAYMENT_AGE_DAYS",
                defaults.max_payment_age_days,
            )
            .clamp(0, 366 * 10),
            rent_due_day: env_parse_or("RENT_DUE_DAY", defaults.rent_due_day).clamp(1, 31),
            large_prepayment_months: env_parse_or(
                "LARGE_PREPAYMENT_MONTHS",
                defaults.large_prepayment_months,
            ),
            very_large_prepayment_months: env_parse_or(
                "VERY_LARGE_PREPAYMENT_MONTHS",
                defaults.very_large_prepayment_months,
            ),
            max_prepayment_months: env_parse_or(
                "MAX_PREPAYMENT_MONTHS",
                defaults.max_prepayment_months,
            )
            .clamp(1, 1200),
        }
    }

    /// Tolerance as a fraction (0.05 for 5%).
    pub fn tolerance_ratio(&self) -> Decimal {
        self.amount_tolerance_percent / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_seconds: u64,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub internal_api_key: Option<String>,
    pub invoice_scheduler_enabled: bool,
    pub invoice_scheduler_hour_utc: u32,
    pub allocation: AllocationPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rent Ledger API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            request_timeout_seconds: env_parse_or("REQUEST_TIMEOUT_SECONDS", 30),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            invoice_scheduler_enabled: env_parse_bool_or("INVOICE_SCHEDULER_ENABLED", true),
            invoice_scheduler_hour_utc: env_parse_or("INVOICE_SCHEDULER_HOUR_UTC", 5).min(23),
            allocation: AllocationPolicy::from_env(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    parse_bool(env_opt(key).as_deref()).unwrap_or(default)
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}
