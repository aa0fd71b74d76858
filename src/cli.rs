use crate::types::{BookingStatus, CustomsDocument};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn non_empty_string(s: &str) -> Result<String, String> {
  if s.trim().is_empty() {
    Err("cannot be empty".to_string())
  } else {
    Ok(s.trim().to_string())
  }
}

fn parse_status(s: &str) -> Result<BookingStatus, String> {
  BookingStatus::parse(s).ok_or_else(|| {
    "expected one of: pending, confirmed, assigned, in_transit, delivered, cancelled".to_string()
  })
}

fn parse_percent(s: &str) -> Result<f64, String> {
  let value: f64 = s.trim().parse().map_err(|_| format!("not a number: {s}"))?;
  if (0.0..=100.0).contains(&value) {
    Ok(value)
  } else {
    Err("must be between 0 and 100".to_string())
  }
}

/// `kind=url`; the file name is taken from the last path segment of the url.
fn parse_document(s: &str) -> Result<CustomsDocument, String> {
  let (kind, url) = s
    .split_once('=')
    .ok_or_else(|| "expected kind=url".to_string())?;
  let (kind, url) = (kind.trim(), url.trim());
  if kind.is_empty() || url.is_empty() {
    return Err("expected kind=url".to_string());
  }
  let file_name = url
    .split(['?', '#'])
    .next()
    .and_then(|path| path.rsplit('/').next())
    .filter(|name| !name.is_empty())
    .unwrap_or(kind);
  Ok(CustomsDocument {
    kind: kind.to_string(),
    file_name: file_name.to_string(),
    url: url.to_string(),
  })
}

#[derive(Debug, Parser)]
#[command(name = "freightdesk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Book freight, track shipments and receive live updates")]
pub struct Cli {
  /// Settings file to use instead of the platform default
  #[arg(long, global = true, value_name = "path")]
  pub config: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Sign in and store the session tokens
  Login {
    #[arg(long, value_parser = non_empty_string)]
    email: String,
    #[arg(long, value_parser = non_empty_string)]
    password: String,
  },
  /// Create an account
  Signup {
    #[arg(long, value_parser = non_empty_string)]
    name: String,
    #[arg(long, value_parser = non_empty_string)]
    email: String,
    #[arg(long, value_parser = non_empty_string)]
    password: String,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    company: Option<String>,
  },
  /// Sign out and forget the stored tokens
  Logout,
  /// Show the signed-in profile
  Whoami,
  /// List bookings
  Bookings {
    #[arg(long, value_parser = parse_status)]
    status: Option<BookingStatus>,
    /// Skip the local cache
    #[arg(long)]
    force: bool,
  },
  /// Create a booking
  Book {
    #[arg(long, value_parser = non_empty_string)]
    pickup: String,
    #[arg(long, value_parser = non_empty_string)]
    dropoff: String,
    #[arg(long)]
    cargo_type: Option<String>,
    #[arg(long)]
    weight_kg: Option<f64>,
    /// RFC 3339 pickup time
    #[arg(long)]
    pickup_at: Option<String>,
  },
  /// Cancel a booking
  Cancel {
    #[arg(value_parser = non_empty_string)]
    id: String,
  },
  /// Ask for a discount on a booking
  Discount {
    #[arg(value_parser = non_empty_string)]
    booking_id: String,
    #[arg(long, value_parser = non_empty_string)]
    reason: String,
    #[arg(long, value_parser = parse_percent)]
    percent: Option<f64>,
  },
  /// Submit customs clearance documents for a booking
  Customs {
    #[arg(value_parser = non_empty_string)]
    booking_id: String,
    /// Document as kind=url, repeatable
    #[arg(long = "doc", value_parser = parse_document, required = true)]
    documents: Vec<CustomsDocument>,
    #[arg(long)]
    notes: Option<String>,
  },
  /// Stay connected and print live notifications until interrupted
  Listen,
}
