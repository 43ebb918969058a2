use std::sync::Arc;

use crate::Config;
use crate::model::ModelManager;
use crate::payments::{ExecutorSettings, PaymentExecutor, PaymentGateway};

#[derive(Debug, Clone)]
pub struct AppState {
    mm: ModelManager,
    gateway: Arc<dyn PaymentGateway>,
    config: &'static Config,
}

impl AppState {
    pub fn new(mm: ModelManager, gateway: Arc<dyn PaymentGateway>, config: &'static Config) -> Self {
        Self {
            mm,
            gateway,
            config,
        }
    }

    pub fn pool(&self) -> &ModelManager {
        &self.mm
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    pub fn config(&self) -> &'static Config {
        self.config
    }

    pub fn executor(&self) -> PaymentExecutor {
        PaymentExecutor::new(
            self.mm.clone(),
            self.gateway.clone(),
            ExecutorSettings::from_config(self.config.payments()),
        )
    }
}
