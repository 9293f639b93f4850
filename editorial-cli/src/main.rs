use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use editorial_core::{allowed_actions, Action, Filter, Section, ACTION_TABLE};

/// Editorial: operator tool for the manuscript workflow service
#[derive(Parser, Debug)]
#[command(name = "editorial")]
#[command(about = "Operator tool for the manuscript workflow service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the permission table
    Matrix(MatrixArgs),
    /// List the actions a section may take on a manuscript under a filter
    Actions(ActionsArgs),
    /// Trigger a sweep on a running server
    Sweep(SweepArgs),
    /// Print the status timeline of a manuscript
    Timeline(TimelineArgs),
}

#[derive(Parser, Debug)]
struct MatrixArgs {
    /// Only rows for this section (e.g. associate-editor)
    #[arg(long)]
    section: Option<Section>,
}

#[derive(Parser, Debug)]
struct ActionsArgs {
    #[arg(long)]
    section: Section,

    #[arg(long)]
    filter: Filter,

    /// The manuscript has more than one revision
    #[arg(long)]
    multiple_revisions: bool,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Base URL of the editorial server
    #[arg(long, env = "EDITORIAL_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Admin bearer token (if not provided, will use ADMIN_AUTH_TOKEN environment variable)
    #[arg(long, env = "ADMIN_AUTH_TOKEN", hide_env_values = true)]
    token: String,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    #[arg(value_parser = ["reinvite", "remind", "retention"])]
    job: String,

    /// Report what would be processed without changing anything
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    /// Manuscript code, e.g. PMSL-24-0001
    code: String,

    #[command(flatten)]
    server: ServerArgs,
}

fn format_actions(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line per table row, columns padded to line up.
fn render_matrix(section: Option<Section>) -> Vec<String> {
    ACTION_TABLE
        .iter()
        .filter(|(s, _, _)| section.map_or(true, |wanted| *s == wanted))
        .map(|(s, f, actions)| {
            format!(
                "{:<18} {:<26} {}",
                s.as_str(),
                f.as_str(),
                format_actions(actions)
            )
        })
        .collect()
}

fn run_matrix(args: MatrixArgs) -> Result<()> {
    let rows = render_matrix(args.section);
    if rows.is_empty() {
        println!("No rows.");
    }
    for row in rows {
        println!("{}", row);
    }
    Ok(())
}

fn run_actions(args: ActionsArgs) -> Result<()> {
    let actions: Vec<Action> = allowed_actions(args.section, args.filter, args.multiple_revisions)
        .into_iter()
        .collect();
    if actions.is_empty() {
        println!("No actions.");
    }
    for action in actions {
        println!("{}", action);
    }
    Ok(())
}

async fn send(request: reqwest::RequestBuilder, token: &str) -> Result<serde_json::Value> {
    let response = request
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .context("Failed to send request to the editorial server")?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .context("Failed to read error response")?;
        return Err(anyhow!("Server error: {} - {}", status, error_text));
    }

    response
        .json()
        .await
        .context("Failed to parse server response")
}

async fn run_sweep(client: &reqwest::Client, args: SweepArgs) -> Result<()> {
    let url = format!(
        "{}/admin/sweeps/{}?dry_run={}",
        args.server.server.trim_end_matches('/'),
        args.job,
        args.dry_run
    );
    let report = send(client.post(url), &args.server.token).await?;

    eprintln!(
        "{} sweep: {} selected, {} processed, {} skipped, {} failed{}",
        args.job,
        report["selected"],
        report["processed"],
        report["skipped"],
        report["failed"],
        if args.dry_run { " (dry run)" } else { "" }
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_timeline(client: &reqwest::Client, args: TimelineArgs) -> Result<()> {
    let url = format!(
        "{}/admin/manuscripts/{}/timeline",
        args.server.server.trim_end_matches('/'),
        args.code
    );
    let body = send(client.get(url), &args.server.token).await?;

    let events = body["events"]
        .as_array()
        .ok_or_else(|| anyhow!("Timeline response has no events"))?;
    for event in events {
        println!(
            "{}  {:<4} {:<16} {}",
            event["created_at"].as_str().unwrap_or("-"),
            event["revision"].as_str().unwrap_or("-"),
            event["event"].as_str().unwrap_or("-"),
            event["value"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    match cli.command {
        Commands::Matrix(args) => run_matrix(args),
        Commands::Actions(args) => run_actions(args),
        Commands::Sweep(args) => run_sweep(&client, args).await,
        Commands::Timeline(args) => run_timeline(&client, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn actions_parses_wire_spellings() {
        let cli = Cli::try_parse_from([
            "editorial",
            "actions",
            "--section",
            "associate-editor",
            "--filter",
            "invite",
        ])
        .unwrap();
        match cli.command {
            Commands::Actions(args) => {
                assert_eq!(args.section, Section::AssociateEditor);
                assert_eq!(args.filter, Filter::Invite);
                assert!(!args.multiple_revisions);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn unknown_sweep_job_is_refused() {
        let err = Cli::try_parse_from(["editorial", "sweep", "purge", "--token", "t"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn matrix_filters_by_section() {
        let rows = render_matrix(Some(Section::Reviewer));
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.starts_with("reviewer ")));
        assert_eq!(render_matrix(None).len(), ACTION_TABLE.len());
    }
}
