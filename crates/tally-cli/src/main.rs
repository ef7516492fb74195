// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tally_analytics::{
	read_stored_state, FileSettingsStore, Properties, StoredState, TrackRequest, Tracker, TrackerConfig,
};
use tracing::{debug, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tally - record analytics events from scripts
#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, env = "TALLY_CONFIG")]
	config: Option<PathBuf>,

	/// Log level (RUST_LOG takes precedence)
	#[arg(short, long, default_value = "warn")]
	log_level: String,

	/// Output logs as JSON
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Record an event and deliver the queue
	Track {
		/// Event type, e.g. `app_started`
		event_type: String,
		/// Event property (repeatable: -p KEY=VALUE, VALUE is parsed as JSON when possible)
		#[arg(long = "property", short = 'p', value_name = "KEY=VALUE")]
		properties: Vec<String>,
		/// User property for this event only (repeatable)
		#[arg(long = "user-property", short = 'u', value_name = "KEY=VALUE")]
		user_properties: Vec<String>,
		#[arg(long)]
		user_id: Option<String>,
		/// Revenue amount, rounded to two significant digits
		#[arg(long)]
		revenue: Option<String>,
		/// Queue the event without sending it
		#[arg(long)]
		postpone: bool,
	},
	/// Send user properties to the identify endpoint
	Identify {
		#[arg(long = "user-property", short = 'u', value_name = "KEY=VALUE")]
		user_properties: Vec<String>,
		#[arg(long)]
		user_id: Option<String>,
		#[arg(long)]
		paying: Option<bool>,
		#[arg(long)]
		start_version: Option<String>,
	},
	/// Deliver everything that is queued
	Flush,
	/// Show queued payload counts
	Status {
		#[arg(long)]
		json: bool,
	},
	/// Drop queued events that have not been sent
	Clear,
}

fn init_tracing(level: &str, json_logs: bool) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(format!("tally_cli={level},tally_analytics={level}")));

	if json_logs {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init();
	} else {
		tracing_subscriber::registry()
			.with(filter)
			.with(fmt::layer().compact().with_writer(std::io::stderr))
			.init();
	}
}

/// `~/.config/tally/config.toml`
fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("tally").join("config.toml"))
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
	let mut config = match path {
		Some(path) => TrackerConfig::from_file(path)
			.with_context(|| format!("failed to load config from {}", path.display()))?,
		None => match default_config_path().filter(|p| p.exists()) {
			Some(path) => TrackerConfig::from_file(&path)?,
			None => TrackerConfig::default(),
		},
	};
	config.apply_env_overrides()?;
	debug!(config = ?config, "Loaded configuration");
	Ok(config)
}

fn parse_properties(assignments: &[String], flag: &str) -> Result<Properties> {
	Properties::from_assignments(assignments).with_context(|| format!("invalid {flag}"))
}

#[derive(Debug, PartialEq, Eq)]
struct StatusReport {
	settings_path: PathBuf,
	stored: StoredState,
}

impl StatusReport {
	fn to_json(&self) -> serde_json::Value {
		json!({
			"settings_path": self.settings_path.display().to_string(),
			"installation_id": self.stored.installation_id,
			"queued_events": self.stored.queued_events,
			"queued_identifications": self.stored.queued_identifications,
		})
	}
}

fn status_report(config: &TrackerConfig) -> Result<StatusReport> {
	let settings_path = config.resolved_settings_path()?;
	let store = FileSettingsStore::new(&settings_path);
	let stored = read_stored_state(&store, &config.settings_section)
		.with_context(|| format!("failed to read {}", settings_path.display()))?;

	Ok(StatusReport {
		settings_path,
		stored,
	})
}

/// Waits for deliveries to settle, reports leftovers, and shuts down.
async fn finish(tracker: Tracker) -> Result<()> {
	tracker.wait_idle().await?;
	let stats = tracker.queue_stats().await?;
	tracker.shutdown().await;

	if !stats.is_drained() {
		warn!(
			events = stats.pending_events,
			identifications = stats.pending_identifications,
			"Some payloads are still queued"
		);
		eprintln!(
			"{} event(s) and {} identification(s) queued for later delivery",
			stats.pending_events, stats.pending_identifications
		);
	}
	Ok(())
}

async fn run(args: Args) -> Result<()> {
	let config = load_config(args.config.as_deref())?;

	match args.command {
		Command::Status { json } => {
			let report = status_report(&config)?;
			if json {
				println!("{}", serde_json::to_string_pretty(&report.to_json())?);
			} else {
				println!("settings:        {}", report.settings_path.display());
				println!(
					"installation id: {}",
					report.stored.installation_id.as_deref().unwrap_or("(none)")
				);
				println!("queued events:   {}", report.stored.queued_events);
				println!("queued identify: {}", report.stored.queued_identifications);
			}
			Ok(())
		}
		Command::Track {
			event_type,
			properties,
			user_properties,
			user_id,
			revenue,
			postpone,
		} => {
			let mut request = TrackRequest::new(event_type)
				.properties(parse_properties(&properties, "--property")?)
				.postpone(postpone);
			if !user_properties.is_empty() {
				request = request.user_properties(parse_properties(&user_properties, "--user-property")?);
			}
			if let Some(revenue) = revenue {
				request = request.revenue(revenue);
			}

			let tracker = Tracker::from_config(&config)?;
			if user_id.is_some() {
				tracker.set_user_id(user_id);
			}
			tracker.track(request).await;
			finish(tracker).await
		}
		Command::Identify {
			user_properties,
			user_id,
			paying,
			start_version,
		} => {
			let user_properties = parse_properties(&user_properties, "--user-property")?;
			let tracker = Tracker::from_config(&config)?;
			if user_id.is_some() {
				tracker.set_user_id(user_id);
			}
			tracker
				.identify_user(user_properties, paying, start_version.as_deref())
				.await;
			finish(tracker).await
		}
		Command::Flush => {
			let tracker = Tracker::from_config(&config)?;
			tracker.flush();
			finish(tracker).await
		}
		Command::Clear => {
			let tracker = Tracker::from_config(&config)?;
			let dropped = tracker.clear_queued_events().await;
			tracker.shutdown().await;
			println!("Cleared {dropped} queued event(s)");
			Ok(())
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_tracing(&args.log_level, args.json_logs);
	run(args).await
}
