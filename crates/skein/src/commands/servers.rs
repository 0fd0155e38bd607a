//! `skein servers` - list configured servers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use skein_config::{ServerEntry, ServerTransport};

use super::{Context, truncate};

/// Arguments for `skein servers`.
#[derive(Args, Debug)]
pub struct ServersArgs {
    /// Include disabled servers
    #[arg(long)]
    pub all: bool,
}

/// Run `skein servers`.
pub fn run(args: ServersArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load()?;
    let servers: Vec<&ServerEntry> = loaded
        .config
        .servers
        .iter()
        .filter(|s| args.all || s.enabled)
        .collect();

    if ctx.json_output {
        let output: Vec<_> = servers
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "transport": transport_name(s.transport),
                    "target": s.target(),
                    "enabled": s.enabled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if servers.is_empty() {
        println!("No MCP servers configured.");
        if ctx.verbose {
            for source in &loaded.sources {
                println!("  checked {}", source.path.display());
            }
        }
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<10} {:<40}",
        "NAME", "TRANSPORT", "STATUS", "TARGET"
    );
    println!("{}", "-".repeat(80));
    for server in servers {
        let status = if server.enabled { "enabled" } else { "disabled" };
        println!(
            "{:<20} {:<10} {:<10} {:<40}",
            truncate(&server.name, 20),
            transport_name(server.transport),
            status,
            truncate(&server.target(), 40)
        );

        if ctx.verbose {
            for [key, value] in &server.env {
                println!("    env {}={}", key, value);
            }
            for [key, _] in &server.headers {
                println!("    header {}", key);
            }
            if let Some(timeout) = server.timeout_secs {
                println!("    timeout {}s", timeout);
            }
        }
    }

    Ok(())
}

fn transport_name(transport: ServerTransport) -> &'static str {
    match transport {
        ServerTransport::Stdio => "stdio",
        ServerTransport::Http => "http",
        ServerTransport::Socket => "socket",
    }
}
