use super::{require_session, CommandResult};
use crate::state::AppState;
use crate::types::{SignupRequest, UserProfile};

fn describe(profile: &UserProfile) -> String {
  match (&profile.name, &profile.company) {
    (Some(name), Some(company)) => format!("{name} <{}> at {company}", profile.email),
    (Some(name), None) => format!("{name} <{}>", profile.email),
    _ => profile.email.clone(),
  }
}

pub(super) async fn login(state: &AppState, email: &str, password: &str) -> CommandResult {
  let session = state.login(email, password).await?;
  let who = session
    .user
    .as_ref()
    .map(describe)
    .unwrap_or_else(|| email.to_string());
  println!("Signed in as {who}");
  Ok(())
}

pub(super) async fn signup(
  state: &AppState,
  name: String,
  email: String,
  password: String,
  phone: Option<String>,
  company: Option<String>,
) -> CommandResult {
  let body = SignupRequest {
    name,
    email,
    password,
    phone,
    company,
  };
  let session = state.signup(&body).await?;
  let who = session
    .user
    .as_ref()
    .map(describe)
    .unwrap_or_else(|| body.email.clone());
  println!("Account created for {who}");
  Ok(())
}

pub(super) async fn logout(state: &AppState) -> CommandResult {
  state.logout().await?;
  println!("Signed out");
  Ok(())
}

pub(super) async fn whoami(state: &AppState) -> CommandResult {
  require_session(state).await?;
  let profile = state.refresh_profile().await?;
  println!("{}", describe(&profile));
  if let Some(phone) = profile.phone.as_deref() {
    println!("phone: {phone}");
  }
  Ok(())
}
