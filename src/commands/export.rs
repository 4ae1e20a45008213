//! `iamsync export`: snapshot users into export records.

use anyhow::{Context as _, Result};
use iamkit::{ActivityReport, Client, Error as IamError};

use crate::Context;
use crate::cli::ExportArgs;
use crate::progress;
use crate::records::{self, ExportRecord};
use crate::ui;

pub fn run(ctx: &Context, args: ExportArgs) -> Result<()> {
    let client = super::client(ctx)?;
    // JSON on stdout must stay clean, so status lines only go out with -o.
    let chatty = args.output.is_some() && !ctx.quiet;

    let report = if args.no_report {
        None
    } else {
        fetch_report(ctx, &client, chatty)?
    };

    let pb = chatty.then(|| progress::spinner("Reading IAM users..."));
    let records = collect_records(&client, &args.users, report.as_ref());
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let records = records?;

    records::write_records(&records, args.output.as_deref())?;

    if chatty && let Some(path) = &args.output {
        ui::success(&format!(
            "Exported {} to {}",
            ui::plural(records.len(), "user"),
            path.display()
        ));
    }
    Ok(())
}

/// Fetch the credential report. A report that never becomes ready only costs
/// the activity columns; any other failure aborts the export.
fn fetch_report(ctx: &Context, client: &Client, chatty: bool) -> Result<Option<ActivityReport>> {
    let pb = chatty.then(|| progress::spinner("Generating credential report..."));
    let result = client.fetch_activity_report(&ctx.config.poll_config());
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }

    match result {
        Ok(report) => Ok(Some(report)),
        Err(e @ IamError::ReportTimeout { .. }) => {
            log::warn!("{}; activity columns will be N/A", e);
            if chatty {
                ui::warn(&format!("{e}; activity columns will be N/A"));
            }
            Ok(None)
        }
        Err(e) => Err(e).context("Could not fetch credential report"),
    }
}

/// Build export records for `users`, or for every user when empty.
pub fn collect_records(
    client: &Client,
    users: &[String],
    report: Option<&ActivityReport>,
) -> Result<Vec<ExportRecord>> {
    let snapshots = if users.is_empty() {
        client.read_all().context("Could not read IAM users")?
    } else {
        users
            .iter()
            .map(|name| {
                client
                    .read_snapshot(name)
                    .with_context(|| format!("Could not read user {name}"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    Ok(snapshots
        .into_iter()
        .map(|snapshot| match report {
            Some(report) => {
                let activity = report.activity_for(&snapshot.user_name);
                snapshot.with_activity(&activity)
            }
            None => snapshot,
        })
        .map(|snapshot| ExportRecord::from(&snapshot))
        .collect())
}
