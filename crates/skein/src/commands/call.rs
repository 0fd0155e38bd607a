//! `skein call` - call a tool on a server.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde_json::Value;

use skein_mcp::Content;

use super::Context;

/// Arguments for `skein call`.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Name of the configured server
    pub name: String,

    /// Tool to call
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long)]
    pub args: Option<String>,
}

/// Run `skein call`.
pub fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(args.args.as_deref())?;

    let client = ctx.connect(&args.name)?;
    let result = client.call_tool(&args.tool, arguments);
    client.shutdown()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for block in &result.content {
            print_content(block);
        }
        if let Some(structured) = &result.structured_content {
            println!("{}", serde_json::to_string_pretty(structured)?);
        }
    }

    if result.is_error {
        let reason = result
            .error
            .clone()
            .or_else(|| result.text())
            .unwrap_or_else(|| "tool reported an error".to_string());
        bail!("tool '{}' failed: {}", args.tool, reason);
    }
    Ok(())
}

/// `--args` must be a JSON object when given.
fn parse_arguments(raw: Option<&str>) -> Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        bail!("--args must be a JSON object");
    }
    Ok(Some(value))
}

fn print_content(block: &Content) {
    match block {
        Content::Text { text } => println!("{}", text),
        Content::Image { mime_type, data } | Content::Audio { mime_type, data } => {
            println!("[{}, {} bytes base64]", mime_type, data.len())
        }
        other => match serde_json::to_string(other) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{:?}", other),
        },
    }
}
