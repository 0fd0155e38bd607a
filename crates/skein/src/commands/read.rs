//! `skein read` - read a resource from a server.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for `skein read`.
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Name of the configured server
    pub name: String,

    /// Resource URI
    pub uri: String,
}

/// Run `skein read`.
pub fn run(args: ReadArgs, ctx: &Context) -> Result<()> {
    let client = ctx.connect(&args.name)?;
    let contents = client.resources().read(&args.uri);
    client.shutdown()?;
    let contents = contents?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&contents)?);
        return Ok(());
    }

    for item in &contents {
        match (&item.text, &item.blob) {
            (Some(text), _) => println!("{}", text),
            (None, Some(blob)) => println!(
                "[{}, {} bytes base64]",
                item.mime_type.as_deref().unwrap_or("application/octet-stream"),
                blob.len()
            ),
            (None, None) => println!("[{} is empty]", item.uri),
        }
    }
    Ok(())
}
