mod bookings;
mod listen;
mod session;

use crate::cli::Command;
use crate::http::ApiError;
use crate::settings::SettingsError;
use crate::state::AppState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
  #[error(transparent)]
  Api(#[from] ApiError),
  #[error(transparent)]
  Settings(#[from] SettingsError),
  #[error("failed to start http client: {0}")]
  Startup(#[from] reqwest::Error),
  #[error("not logged in; run `freightdesk login` first")]
  NotLoggedIn,
  #[error("failed to listen for interrupt: {0}")]
  Signal(#[from] std::io::Error),
}

type CommandResult<T = ()> = Result<T, CommandError>;

async fn require_session(state: &AppState) -> CommandResult {
  match state.tokens.access_token().await.map_err(ApiError::from)? {
    Some(_) => Ok(()),
    None => Err(CommandError::NotLoggedIn),
  }
}

pub async fn execute(state: &AppState, command: Command) -> CommandResult {
  match command {
    Command::Login { email, password } => session::login(state, &email, &password).await,
    Command::Signup {
      name,
      email,
      password,
      phone,
      company,
    } => session::signup(state, name, email, password, phone, company).await,
    Command::Logout => session::logout(state).await,
    Command::Whoami => session::whoami(state).await,
    Command::Bookings { status, force } => bookings::list(state, status, force).await,
    Command::Book {
      pickup,
      dropoff,
      cargo_type,
      weight_kg,
      pickup_at,
    } => {
      bookings::create(
        state,
        crate::types::NewBooking {
          pickup,
          dropoff,
          cargo_type,
          weight_kg,
          pickup_at,
        },
      )
      .await
    }
    Command::Cancel { id } => bookings::cancel(state, &id).await,
    Command::Discount {
      booking_id,
      reason,
      percent,
    } => bookings::discount(state, &booking_id, reason, percent).await,
    Command::Customs {
      booking_id,
      documents,
      notes,
    } => bookings::customs(state, booking_id, documents, notes).await,
    Command::Listen => listen::run(state).await,
  }
}
