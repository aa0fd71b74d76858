use super::{require_session, CommandResult};
use crate::notifications::Alert;
use crate::state::AppState;
use time::format_description::well_known::Rfc3339;

fn format_alert(alert: &Alert) -> String {
  let at = alert
    .shown_at
    .format(&Rfc3339)
    .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
  if alert.body.trim().is_empty() {
    format!("[{at}] {}", alert.title)
  } else {
    format!("[{at}] {}: {}", alert.title, alert.body)
  }
}

pub(super) async fn run(state: &AppState) -> CommandResult {
  require_session(state).await?;
  let mut alerts = state.dispatcher.alerts().subscribe();
  let mut connection = state.realtime.watch_state();
  let dispatch = state.start_dispatching();
  state.resume().await?;
  tracing::info!(state = ?state.realtime.state(), "listening for notifications");

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  let result = loop {
    tokio::select! {
      signal = &mut ctrl_c => break signal.map_err(Into::into),
      changed = alerts.changed() => {
        if changed.is_err() {
          break Ok(());
        }
        let alert = alerts.borrow_and_update().clone();
        if let Some(alert) = alert {
          println!("{}", format_alert(&alert));
        }
      }
      changed = connection.changed() => {
        if changed.is_err() {
          break Ok(());
        }
        let current = *connection.borrow_and_update();
        tracing::info!(state = ?current, "realtime connection changed");
      }
    }
  };

  dispatch.abort();
  result
}
