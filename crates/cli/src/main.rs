use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use serde_json::json;

use ccb::{Daemon, DaemonConfig};
use ccb_cli::cli::{Cli, Command};
use ccb_cli::client::{DEFAULT_DAEMON_PORT, DaemonClient, print_response};
use ccb_cli::{logging, server};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = run(cli).await {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<()> {
	match cli.command {
		Command::Serve { workspaces_root } => {
			let port = cli.port.unwrap_or(DEFAULT_DAEMON_PORT);
			let config = DaemonConfig {
				http_port: port,
				workspaces_root,
				..DaemonConfig::default()
			};
			let daemon = Arc::new(Daemon::new(config)?);
			server::serve(daemon, port).await
		}
		command => client_command(cli.port, command).await,
	}
}

async fn client_command(port: Option<u16>, command: Command) -> Result<()> {
	let client = DaemonClient::new(port)?;
	let value = match command {
		Command::Serve { .. } => unreachable!("handled by run"),
		Command::Status => client.get("/").await?,
		Command::Start {
			browser,
			workspace,
			incognito,
			headless,
			system_profile,
			cdp_port,
		} => {
			client
				.post(
					"/start",
					json!({
						"browser": browser,
						"workspace": workspace,
						"incognito": incognito,
						"headless": headless,
						"systemProfile": system_profile,
						"port": cdp_port,
					}),
				)
				.await?
		}
		Command::Stop => client.post("/stop", json!({})).await?,
		Command::Navigate { url } => client.post("/navigate", json!({ "url": url })).await?,
		Command::Snapshot => client.post("/snapshot", json!({})).await?,
		Command::Click {
			element_ref,
			text,
			selector,
		} => {
			client
				.post(
					"/click",
					json!({ "ref": element_ref, "text": text, "selector": selector }),
				)
				.await?
		}
		Command::Tabs => client.get("/tabs").await?,
		Command::Mode { mode } => match mode {
			Some(mode) => client.post("/mode", json!({ "mode": mode })).await?,
			None => client.get("/mode").await?,
		},
		Command::Browsers => client.get("/browsers").await?,
		Command::Profiles => client.get("/profiles").await?,
		Command::RecordStart { name } => client.post("/record/start", json!({ "name": name })).await?,
		Command::RecordStop => client.post("/record/stop", json!({})).await?,
		Command::Replay { name } => client.post("/replay", json!({ "name": name })).await?,
		Command::Call { route, body } => {
			let body = match body {
				Some(raw) => serde_json::from_str(&raw).map_err(|err| anyhow!("body is not valid JSON: {err}"))?,
				None => json!({}),
			};
			let route = if route.starts_with('/') { route } else { format!("/{route}") };
			client.post(&route, body).await?
		}
	};
	print_response(&value);
	Ok(())
}
