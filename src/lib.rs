pub mod api;
mod app;
pub mod cli;
mod commands;
pub mod http;
pub mod notifications;
pub mod realtime;
mod redact;
pub mod settings;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use cli::Cli;
pub use commands::CommandError;
pub use state::AppState;

pub fn run(cli: Cli) -> std::process::ExitCode {
    app::run(cli)
}
