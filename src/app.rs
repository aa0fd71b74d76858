use crate::cli::Cli;
use crate::commands::{self, CommandError};
use crate::settings::Settings;
use crate::state::AppState;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn setup_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}

async fn run_command(cli: Cli) -> Result<(), CommandError> {
  let settings = Settings::load(cli.config.as_deref())?;
  tracing::debug!(api = %settings.api_base_url, realtime = %settings.realtime_url, "settings loaded");

  let state = AppState::create(settings)?;
  let result = commands::execute(&state, cli.command).await;
  state.dispose().await;
  result
}

pub fn run(cli: Cli) -> ExitCode {
  setup_logging();

  let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
    Ok(runtime) => runtime,
    Err(e) => {
      eprintln!("error: failed to start runtime: {e}");
      return ExitCode::FAILURE;
    }
  };

  match runtime.block_on(run_command(cli)) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("error: {e}");
      ExitCode::FAILURE
    }
  }
}
