//! Where the allocation table and engine settings come from.

use crate::allocation::AllocationTable;
use crate::config::{Config, EngineConfig};
use crate::error::StartupError;

/// Supplier of the target table and engine settings.
///
/// Errors are reported verbatim and stop startup.
pub trait AllocationSource {
    fn read_allocation_table(&self) -> Result<AllocationTable, StartupError>;

    fn read_config(&self) -> Result<EngineConfig, StartupError>;
}

/// Allocation source backed by the loaded [`Config`].
pub struct ConfigAllocationSource {
    config: Config,
}

impl ConfigAllocationSource {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl AllocationSource for ConfigAllocationSource {
    fn read_allocation_table(&self) -> Result<AllocationTable, StartupError> {
        if self.config.allocation.is_empty() {
            return Err(StartupError::Source(
                "no [[allocation]] rows configured".to_string(),
            ));
        }

        Ok(AllocationTable::from_rows(&self.config.allocation)?)
    }

    fn read_config(&self) -> Result<EngineConfig, StartupError> {
        self.config
            .validate()
            .map_err(|e| StartupError::Config(e.to_string()))?;

        Ok(self.config.engine.clone())
    }
}
