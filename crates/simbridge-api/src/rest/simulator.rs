// Simulator control endpoints.

use super::RestClient;
use super::models::{SimulatorOptions, SimulatorRun};
use crate::Error;

impl RestClient {
    /// Start a simulator run for the current account.
    pub async fn start_simulator(&self, opts: &SimulatorOptions) -> Result<SimulatorRun, Error> {
        self.post("api/v1/simulator/start", opts).await
    }

    /// Stop the active simulator run. Stopping when nothing is running
    /// is a gateway-side no-op that still returns the last run.
    pub async fn stop_simulator(&self) -> Result<SimulatorRun, Error> {
        self.post_empty("api/v1/simulator/stop").await
    }

    /// State of the current (or most recent) simulator run.
    pub async fn simulator_status(&self) -> Result<SimulatorRun, Error> {
        self.get("api/v1/simulator").await
    }
}
