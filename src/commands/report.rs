use anyhow::{Context as _, Result};
use colored::Colorize;
use iamkit::ActivityReport;

use crate::Context;
use crate::progress;
use crate::ui::{self, format_flag, format_time};

pub fn run(ctx: &Context) -> Result<()> {
    let client = super::client(ctx)?;

    let pb = (!ctx.quiet).then(|| progress::spinner("Generating credential report..."));
    let report = client.fetch_activity_report(&ctx.config.poll_config());
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let report = report.context("Could not fetch credential report")?;

    ui::header("Credential Report");
    if report.is_empty() {
        println!();
        ui::dim("No users in report");
        return Ok(());
    }

    println!();
    for line in render(&report) {
        println!("{line}");
    }
    println!();
    ui::dim(&ui::plural(report.len(), "user"));
    Ok(())
}

/// Table lines, header first.
fn render(report: &ActivityReport) -> Vec<String> {
    let names = report.user_names();
    let width = names
        .iter()
        .map(|n| n.chars().count())
        .max()
        .unwrap_or(0)
        .max("USER".len());

    let mut lines = vec![format!(
        "  {:<width$}  {:<8}  {:<20}  {:<4}  {:<20}  {:<20}",
        "USER", "PASSWORD", "PASSWORD LAST USED", "MFA", "KEY 1 LAST USED", "KEY 2 LAST USED"
    )
    .bold()
    .to_string()];

    for name in names {
        let activity = report.activity_for(name);
        lines.push(format!(
            "  {:<width$}  {:<8}  {:<20}  {:<4}  {:<20}  {:<20}",
            name,
            format_flag(activity.password_enabled),
            format_time(activity.password_last_used),
            format_flag(activity.mfa_active),
            format_time(activity.access_key_1_last_used),
            format_time(activity.access_key_2_last_used),
        ));
    }
    lines
}
