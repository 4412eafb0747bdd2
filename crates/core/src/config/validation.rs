use super::types::FlowgateConfig;
use crate::error::FlowgateError;

impl FlowgateConfig {
    /// Reject only structurally impossible values; everything else degrades
    /// to defaults downstream.
    pub fn validate(&self) -> Result<(), FlowgateError> {
        self.validate_heap_fraction()?;
        self.validate_alert_target()?;
        Ok(())
    }

    fn validate_heap_fraction(&self) -> Result<(), FlowgateError> {
        match self.queue.max_heap_fraction {
            Some(v) if !v.is_finite() || v < 0.0 => Err(FlowgateError::Config(format!(
                "queue.max_heap_fraction must be a non-negative number, got {v}"
            ))),
            _ => Ok(()),
        }
    }

    fn validate_alert_target(&self) -> Result<(), FlowgateError> {
        match self.scheduler.utilization_alert_target {
            Some(v) if !v.is_finite() || !(0.0..=1.0).contains(&v) => {
                Err(FlowgateError::Config(format!(
                    "scheduler.utilization_alert_target must be within 0..=1, got {v}"
                )))
            }
            _ => Ok(()),
        }
    }
}
