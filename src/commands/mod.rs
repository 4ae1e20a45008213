//! Command implementations

pub mod apply;
pub mod config;
pub mod export;
pub mod plan;
pub mod report;

use anyhow::{Context as _, Result};
use iamkit::Client;

use crate::Context;

/// Connect to IAM through the aws CLI, honoring config and flags.
pub fn client(ctx: &Context) -> Result<Client> {
    let options = ctx
        .config
        .aws_options(ctx.profile.as_deref(), ctx.region.as_deref());
    log::debug!(
        "aws profile: {}, region: {}",
        options.profile.as_deref().unwrap_or("(default)"),
        options.region.as_deref().unwrap_or("(default)")
    );
    Client::new(options).context("Could not set up IAM access")
}
