//! Simulator command handlers.

use simbridge_core::{Gateway, SimulatorOptions, SimulatorRun};

use crate::cli::{GlobalOpts, SimArgs, SimCommand};
use crate::error::CliError;
use crate::output;

pub async fn handle(gateway: &Gateway, args: SimArgs, global: &GlobalOpts) -> Result<(), CliError> {
    gateway.connect().await?;

    let run = match args.command {
        SimCommand::Start {
            scenario,
            speed,
            cash,
        } => {
            let options = SimulatorOptions {
                scenario,
                speed,
                starting_cash: cash,
            };
            tracing::info!(scenario = ?options.scenario, "starting simulator");
            gateway.start_simulator(&options).await?
        }
        SimCommand::Stop => gateway.stop_simulator().await?,
        SimCommand::Status => gateway.simulator_status().await?,
    };

    let out = output::render_single(&global.output, &run, format_run);
    output::print_output(&out);
    Ok(())
}

fn format_run(run: &SimulatorRun) -> String {
    match (run.running, &run.started_at, &run.stopped_at) {
        (true, Some(started), _) => {
            format!("run {} running since {}", run.run_id, started.to_rfc3339())
        }
        (true, None, _) => format!("run {} running", run.run_id),
        (false, _, Some(stopped)) => {
            format!("run {} stopped at {}", run.run_id, stopped.to_rfc3339())
        }
        (false, _, None) => format!("run {} not running", run.run_id),
    }
}
