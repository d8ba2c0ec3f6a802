/// Resources shared by every swarm object this control plane creates.
#[derive(Clone, Debug)]
pub struct DriverSettings {
    /// Prefix added to the name of every docker resource this process manages,
    /// so multiple control planes can share one daemon without colliding.
    pub prefix: String,
    pub log_driver: Option<LogDriverSettings>,
}

#[derive(Clone, Debug)]
pub struct LogDriverSettings {
    pub endpoint: String,
}

#[derive(Default)]
pub struct DriverSettingsBuilder {
    prefix: Option<String>,
    log_endpoint: Option<String>,
}

impl DriverSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix<S: ToString>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn log_endpoint<S: ToString>(mut self, endpoint: S) -> Self {
        self.log_endpoint = Some(endpoint.to_string());
        self
    }

    pub fn build(self) -> DriverSettings {
        DriverSettings {
            prefix: self.prefix.unwrap_or_else(|| "zane".to_string()),
            log_driver: self.log_endpoint.map(|endpoint| LogDriverSettings { endpoint }),
        }
    }
}

impl DriverSettings {
    pub fn builder() -> DriverSettingsBuilder {
        DriverSettingsBuilder::new()
    }
}
