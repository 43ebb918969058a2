use serde::Deserialize;

static CONFIG: OnceCell<Config> = OnceCell::const_new();

mod config_dir;
pub use config_dir::{find_config_file, read_config};

mod error;
pub use error::{ConfigError, ConfigResult};
use tokio::sync::OnceCell;

#[derive(Debug, Deserialize)]
pub struct Config {
    host: Host,
    app: App,
    stripe: Stripe,
    #[serde(default)]
    payments: Payments,
    cron: Cron,
}

#[derive(Debug, Deserialize)]
pub struct Host {
    bindto: String,
}

#[derive(Debug, Deserialize)]
pub struct App {
    jwt: String,
    database_uri: String,
    #[serde(default)]
    docs: bool,
    admin_username: String,
    admin_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stripe {
    #[serde(default)]
    secret_key: String,
    #[serde(default)]
    webhook_secret: String,
    #[serde(default = "default_api_base")]
    api_base: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    development_mode: bool,
    success_url: String,
    cancel_url: String,
    #[serde(default)]
    starter_price_id: String,
    #[serde(default)]
    basic_price_id: String,
    #[serde(default)]
    premium_price_id: String,
}

/// Timing of the deferred lesson charge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Payments {
    charge_window_minutes: i64,
    lookback_minutes: i64,
    retry_attempts: u32,
    retry_backoff_ms: u64,
    max_charge_runs: i32,
    immediate_on_approval: bool,
    scheduler_enabled: bool,
    scheduler_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Cron {
    secret: String,
}

fn default_api_base() -> String {
    String::from("https://api.stripe.com/v1")
}

fn default_currency() -> String {
    String::from("jpy")
}

impl Default for Payments {
    fn default() -> Self {
        Self {
            charge_window_minutes: 120,
            lookback_minutes: 5,
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            max_charge_runs: 3,
            immediate_on_approval: true,
            scheduler_enabled: false,
            scheduler_interval_secs: 300,
        }
    }
}

impl Config {
    #[tracing::instrument]
    pub async fn get_or_init(use_local: bool) -> &'static Config {
        CONFIG
            .get_or_init(|| async {
                let read_cfg = |use_local| -> ConfigResult<Self> {
                    let raw = String::from_utf8(read_config(use_local)?)?;
                    let config: Self = toml::from_str(&raw)?;
                    Ok(config)
                };

                match read_cfg(use_local) {
                    Ok(c) => c,
                    Err(e) => {
                        if !matches!(e, error::ConfigError::ConfigNotFound) {
                            crate::error::log_error(&e);
                        }
                        tracing::error!("Config not found.");
                        std::process::exit(1);
                    }
                }
            })
            .await
    }

    #[inline]
    pub fn host(&self) -> &Host {
        &self.host
    }

    #[inline]
    pub fn app(&self) -> &App {
        &self.app
    }

    #[inline]
    pub fn stripe(&self) -> &Stripe {
        &self.stripe
    }

    #[inline]
    pub fn payments(&self) -> &Payments {
        &self.payments
    }

    #[inline]
    pub fn cron(&self) -> &Cron {
        &self.cron
    }
}

impl Host {
    #[inline]
    pub fn bindto(&self) -> &str {
        &self.bindto
    }
}

impl App {
    #[inline]
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    #[inline]
    pub fn database_uri(&self) -> &str {
        &self.database_uri
    }

    #[inline]
    pub fn docs(&self) -> bool {
        self.docs
    }

    #[inline]
    pub fn admin_username(&self) -> &str {
        &self.admin_username
    }

    #[inline]
    pub fn admin_password(&self) -> &str {
        &self.admin_password
    }
}

impl Stripe {
    #[inline]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    #[inline]
    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    #[inline]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    #[inline]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    #[inline]
    pub fn development_mode(&self) -> bool {
        self.development_mode
    }

    #[inline]
    pub fn success_url(&self) -> &str {
        &self.success_url
    }

    #[inline]
    pub fn cancel_url(&self) -> &str {
        &self.cancel_url
    }

    /// Price id of a paid subscription tier, `None` for free or unconfigured tiers.
    pub fn price_id(&self, tier: crate::booking::SubscriptionTier) -> Option<&str> {
        use crate::booking::SubscriptionTier;

        let id = match tier {
            SubscriptionTier::Freemium => return None,
            SubscriptionTier::Starter => &self.starter_price_id,
            SubscriptionTier::Basic => &self.basic_price_id,
            SubscriptionTier::Premium => &self.premium_price_id,
        };

        if id.is_empty() { None } else { Some(id) }
    }

    /// Reverse lookup used by subscription webhooks.
    pub fn tier_for_price(&self, price_id: &str) -> Option<crate::booking::SubscriptionTier> {
        use crate::booking::SubscriptionTier;

        [
            SubscriptionTier::Starter,
            SubscriptionTier::Basic,
            SubscriptionTier::Premium,
        ]
        .into_iter()
        .find(|tier| self.price_id(*tier) == Some(price_id))
    }
}

impl Payments {
    #[inline]
    pub fn charge_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.charge_window_minutes)
    }

    #[inline]
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookback_minutes)
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    #[inline]
    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }

    #[inline]
    pub fn max_charge_runs(&self) -> i32 {
        self.max_charge_runs
    }

    #[inline]
    pub fn immediate_on_approval(&self) -> bool {
        self.immediate_on_approval
    }

    #[inline]
    pub fn scheduler_enabled(&self) -> bool {
        self.scheduler_enabled
    }

    #[inline]
    pub fn scheduler_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler_interval_secs.max(1))
    }
}

impl Cron {
    #[inline]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::booking::SubscriptionTier;

    #[tokio::test]
    async fn config_test() {
        let config = Config::get_or_init(true).await;
        assert_eq!(config.host().bindto(), "127.0.0.1:5000"); // defaults
        assert!(config.stripe().development_mode());
    }

    #[test]
    fn payments_defaults_when_section_missing() {
        let raw = r#"
            [host]
            bindto = "0.0.0.0:8080"

            [app]
            jwt = "secret"
            database_uri = "postgres://localhost/mued"
            admin_username = "admin"
            admin_password = "admin"

            [stripe]
            success_url = "http://localhost/success"
            cancel_url = "http://localhost/cancel"
            basic_price_id = "price_basic"

            [cron]
            secret = "cron"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.payments().charge_window(), chrono::Duration::minutes(120));
        assert_eq!(config.payments().retry_attempts(), 3);
        assert!(!config.payments().scheduler_enabled());
        assert_eq!(config.stripe().currency(), "jpy");
        assert_eq!(config.stripe().api_base(), "https://api.stripe.com/v1");

        assert_eq!(config.stripe().price_id(SubscriptionTier::Basic), Some("price_basic"));
        assert_eq!(config.stripe().price_id(SubscriptionTier::Premium), None);
        assert_eq!(config.stripe().price_id(SubscriptionTier::Freemium), None);
        assert_eq!(
            config.stripe().tier_for_price("price_basic"),
            Some(SubscriptionTier::Basic)
        );
        assert_eq!(config.stripe().tier_for_price("price_unknown"), None);
    }
}
