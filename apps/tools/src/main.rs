use std::{fs, io::Write, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use review_api::{
    add_comment, change_status, check_score_drift, export_submission, list_comments,
    score_summary, set_flag, submit_score, ReviewContext,
};
use shared::{
    domain::{AdminIdentity, KindFilter, NewSubmission, SubmissionId, SubmissionStatus},
    protocol::ScoreInput,
};
use storage::{open_backend, CommentLogStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Admin tools for the submission review log")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/review.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct AdminArgs {
    #[arg(long = "admin-id")]
    id: String,
    #[arg(long = "admin-name", default_value = "")]
    name: String,
    #[arg(long = "admin-email", default_value = "")]
    email: String,
}

impl AdminArgs {
    fn identity(&self) -> AdminIdentity {
        let name = if self.name.is_empty() {
            self.id.clone()
        } else {
            self.name.clone()
        };
        AdminIdentity::new(self.id.clone(), name, self.email.clone())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Registers a submission to review.
    CreateSubmission {
        title: String,
        director: String,
        email: String,
        #[arg(long, default_value = "open")]
        category: String,
    },
    Comment {
        submission_id: i64,
        content: String,
        #[command(flatten)]
        admin: AdminArgs,
    },
    /// Scores the five criteria, replacing the admin's previous score.
    Score {
        submission_id: i64,
        technical: u8,
        story: u8,
        creativity: u8,
        chiangmai: u8,
        human_effort: u8,
        #[arg(long)]
        comment: Option<String>,
        #[command(flatten)]
        admin: AdminArgs,
    },
    List {
        submission_id: i64,
        #[arg(long, default_value = "all")]
        filter: KindFilter,
    },
    Status {
        submission_id: i64,
        status: SubmissionStatus,
        #[arg(long)]
        reason: Option<String>,
        #[command(flatten)]
        admin: AdminArgs,
    },
    Flag {
        submission_id: i64,
        /// Removes the flag instead of setting it.
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        reason: Option<String>,
        #[command(flatten)]
        admin: AdminArgs,
    },
    Summary {
        submission_id: i64,
    },
    /// Writes the review document as JSON, to stdout unless `--out` is given.
    Export {
        submission_id: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compares the score list against the comment log. Fails on any difference.
    CheckScores {
        submission_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = open_context(&cli.database_url).await?;
    let mut stdout = std::io::stdout().lock();
    run(&ctx, cli.command, &mut stdout).await
}

async fn open_context(database_url: &str) -> Result<ReviewContext> {
    let backend = open_backend(database_url)
        .await
        .with_context(|| format!("failed to open review database '{database_url}'"))?;
    Ok(ReviewContext::new(CommentLogStore::new(backend)))
}

async fn run(ctx: &ReviewContext, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::CreateSubmission {
            title,
            director,
            email,
            category,
        } => {
            let record = ctx
                .store
                .create_submission(NewSubmission {
                    title,
                    director_name: director,
                    applicant_email: email,
                    category,
                })
                .await?;
            writeln!(out, "created submission_id={}", record.id)?;
        }
        Command::Comment {
            submission_id,
            content,
            admin,
        } => {
            let event =
                add_comment(ctx, SubmissionId(submission_id), admin.identity(), &content).await?;
            writeln!(out, "added comment event_id={}", event.id)?;
        }
        Command::Score {
            submission_id,
            technical,
            story,
            creativity,
            chiangmai,
            human_effort,
            comment,
            admin,
        } => {
            let input = ScoreInput {
                technical: technical.into(),
                story: story.into(),
                creativity: creativity.into(),
                chiangmai: chiangmai.into(),
                human_effort: human_effort.into(),
                total_score: None,
            };
            let update = submit_score(
                ctx,
                SubmissionId(submission_id),
                admin.identity(),
                input,
                comment,
            )
            .await?;
            writeln!(
                out,
                "scored event_id={} total={} scorers={}",
                update.event.id,
                update
                    .event
                    .body
                    .score_payload()
                    .map(|s| s.total_score)
                    .unwrap_or_default(),
                update.record.scores.len()
            )?;
        }
        Command::List {
            submission_id,
            filter,
        } => {
            let events = list_comments(ctx, SubmissionId(submission_id), filter).await?;
            for event in events {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}{}\t{}",
                    event.id,
                    event.kind(),
                    event.created_at.instant().to_rfc3339(),
                    event.author.name,
                    if event.is_edited { " (edited)" } else { "" },
                    event.content()
                )?;
            }
        }
        Command::Status {
            submission_id,
            status,
            reason,
            admin,
        } => {
            let update = change_status(
                ctx,
                SubmissionId(submission_id),
                admin.identity(),
                status,
                reason,
            )
            .await?;
            writeln!(out, "{}", update.event.content())?;
        }
        Command::Flag {
            submission_id,
            clear,
            reason,
            admin,
        } => {
            let update = set_flag(
                ctx,
                SubmissionId(submission_id),
                admin.identity(),
                !clear,
                reason,
            )
            .await?;
            writeln!(out, "{}", update.event.content())?;
        }
        Command::Summary { submission_id } => {
            let summary = score_summary(ctx, SubmissionId(submission_id)).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        }
        Command::Export { submission_id, out: path } => {
            let export = export_submission(ctx, SubmissionId(submission_id)).await?;
            let json = serde_json::to_string_pretty(&export)?;
            match path {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("failed to write '{}'", path.display()))?;
                    info!(path = %path.display(), %submission_id, "export written");
                    writeln!(out, "exported to {}", path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        Command::CheckScores { submission_id } => {
            let drift = check_score_drift(ctx, SubmissionId(submission_id)).await?;
            if drift.is_empty() {
                writeln!(out, "scores consistent")?;
            } else {
                writeln!(out, "{}", serde_json::to_string_pretty(&drift)?)?;
                anyhow::bail!(
                    "{} score difference(s) between list and log for submission {submission_id}",
                    drift.len()
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
