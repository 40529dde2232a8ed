//! Command-line surface. `serve` hosts the daemon; everything else is a
//! thin HTTP client call against a running one.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ccb", version, about = "cc-browser: drive a Chromium-family browser over CDP")]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug).
	#[arg(short, long, global = true, action = ArgAction::Count)]
	pub verbose: u8,

	/// Daemon HTTP port; defaults to the lockfile's port, then 18791.
	#[arg(long, global = true)]
	pub port: Option<u16>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Run the daemon in the foreground.
	Serve {
		/// Override the workspace descriptor root (mainly for tests).
		#[arg(long)]
		workspaces_root: Option<PathBuf>,
	},
	/// Daemon and active-session status.
	Status,
	/// Start a browser session against a workspace or alias.
	Start {
		/// Browser kind (chrome|edge|brave) or an alias.
		browser: Option<String>,
		/// Workspace slug or alias.
		#[arg(long, short)]
		workspace: Option<String>,
		#[arg(long)]
		incognito: bool,
		#[arg(long)]
		headless: bool,
		/// Use the OS profile directory instead of a managed one.
		#[arg(long)]
		system_profile: bool,
		/// Override the CDP debugging port.
		#[arg(long)]
		cdp_port: Option<u16>,
	},
	/// End the active session and stop the browser.
	Stop,
	/// Navigate the focused tab.
	Navigate { url: String },
	/// Accessibility snapshot with element refs.
	Snapshot,
	/// Click by ref, text, or selector.
	Click {
		#[arg(long = "ref")]
		element_ref: Option<String>,
		#[arg(long)]
		text: Option<String>,
		#[arg(long, short)]
		selector: Option<String>,
	},
	/// List open tabs.
	Tabs,
	/// Show or set the interaction mode (fast|human|stealth).
	Mode { mode: Option<String> },
	/// Installed browsers.
	Browsers,
	/// Configured workspaces.
	Profiles,
	/// Start recording on the focused tab.
	RecordStart {
		#[arg(long)]
		name: Option<String>,
	},
	/// Stop recording and persist the step list.
	RecordStop,
	/// Replay a saved recording by slug query.
	Replay { name: String },
	/// Raw verb passthrough: POST an arbitrary route with a JSON body.
	Call {
		/// Route, e.g. /wait or /sessions/create.
		route: String,
		/// JSON body; defaults to {}.
		body: Option<String>,
	},
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn cli_definition_is_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn click_accepts_ref_flag() {
		let cli = Cli::try_parse_from(["ccb", "click", "--ref", "e3"]).unwrap();
		match cli.command {
			Command::Click { element_ref, .. } => assert_eq!(element_ref.as_deref(), Some("e3")),
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn call_takes_route_and_body() {
		let cli = Cli::try_parse_from(["ccb", "call", "/wait", r#"{"timeMs":100}"#]).unwrap();
		match cli.command {
			Command::Call { route, body } => {
				assert_eq!(route, "/wait");
				assert!(body.unwrap().contains("timeMs"));
			}
			other => panic!("unexpected command {other:?}"),
		}
	}
}
