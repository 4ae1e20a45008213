use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::TEMPLATE;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Path => {
            println!("{}", paths::config_file()?.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = paths::config_file()?;
            init(&path, force)?;
            ui::success(&format!("Wrote {}", paths::display(&path)));
            Ok(())
        }
    }
}

fn show(ctx: &Context) -> Result<()> {
    let path = paths::config_file()?;

    ui::header("Configuration");
    ui::kv("File", &paths::display(&path));
    if !path.exists() {
        ui::dim("Not found; showing defaults. Run 'iamsync config init' to create it.");
    }
    println!();
    print!("{}", ctx.config.to_toml()?);
    Ok(())
}

/// Write the starter config to `path`.
fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    fs::write(path, TEMPLATE).with_context(|| format!("Could not write {}", path.display()))
}
