//! `skein inspect` - connect to a server and show what it offers.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use skein_mcp::{McpClient, Page, Prompt, Resource};

use super::{Context, truncate};

/// Arguments for `skein inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Name of the configured server
    pub name: String,

    /// Show full tool input schemas
    #[arg(long)]
    pub schemas: bool,
}

/// Run `skein inspect`.
pub fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let client = ctx.connect(&args.name)?;
    let info = client.session_info();
    let advertises = |capability: &str| {
        info.as_ref()
            .is_some_and(|i| i.capabilities.contains_key(capability))
    };

    let tools = client.list_tools()?;
    let resources: Vec<Resource> = if advertises("resources") {
        collect(|cursor| client.resources().list(cursor))?
    } else {
        Vec::new()
    };
    let prompts: Vec<Prompt> = if advertises("prompts") {
        collect(|cursor| client.prompts().list(cursor))?
    } else {
        Vec::new()
    };

    if ctx.json_output {
        let output = json!({
            "session": info,
            "tools": tools,
            "resources": resources,
            "prompts": prompts,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return finish(client);
    }

    if let Some(info) = &info {
        let server = info
            .server_info
            .as_ref()
            .map(|s| format!("{} {}", s.name, s.version))
            .unwrap_or_else(|| "(unnamed server)".to_string());
        println!("Server:    {}", server);
        println!("Protocol:  {}", info.protocol_version);
        println!("Transport: {}", info.transport);
        if let Some(id) = &info.session_id {
            println!("Session:   {}", id);
        }
        if let Some(instructions) = &info.instructions {
            println!("Notes:     {}", instructions);
        }
    }

    println!();
    println!("Tools ({}):", tools.len());
    for tool in &tools {
        let desc = tool.description.as_deref().unwrap_or("");
        println!("  {:<24} {}", truncate(&tool.name, 24), truncate(desc, 54));
        if args.schemas {
            let schema = serde_json::to_string_pretty(&tool.input_schema)?;
            for line in schema.lines() {
                println!("      {}", line);
            }
        }
    }

    if advertises("resources") {
        println!();
        println!("Resources ({}):", resources.len());
        for resource in &resources {
            println!("  {:<40} {}", truncate(&resource.uri, 40), resource.name);
        }
    }

    if advertises("prompts") {
        println!();
        println!("Prompts ({}):", prompts.len());
        for prompt in &prompts {
            let desc = prompt.description.as_deref().unwrap_or("");
            println!("  {:<24} {}", truncate(&prompt.name, 24), truncate(desc, 54));
        }
    }

    finish(client)
}

/// Follow cursors until the last page.
fn collect<T, F>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<&str>) -> skein_mcp::Result<Page<T>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = fetch(cursor.as_deref())?;
        items.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}

fn finish(client: McpClient) -> Result<()> {
    client.shutdown()?;
    Ok(())
}
