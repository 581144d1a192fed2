use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, ErrorReporter, FileAttachment, HttpJobBackend, JobBackend, JobClient,
    JobEvent, JobSubmission, Settings, StopReason,
};
use futures::StreamExt;
use shared::domain::{JobFlow, JobHandle, Severity};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jobctl", about = "Submit jobs to the job server and follow them")]
struct Cli {
    /// Settings file; `jobctl.toml` in the working directory is used when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print status updates until the job finishes.
    Submit {
        #[arg(long)]
        file: PathBuf,
        #[arg(long = "field", value_name = "NAME=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        #[arg(long, value_enum, default_value_t = FlowArg::Finetune)]
        flow: FlowArg,
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Query the status of an existing job once.
    Status { handle: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FlowArg {
    Finetune,
    Convert,
}

impl From<FlowArg> for JobFlow {
    fn from(value: FlowArg) -> Self {
        match value {
            FlowArg::Finetune => JobFlow::FineTune,
            FlowArg::Convert => JobFlow::EbookConversion,
        }
    }
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("field name is empty in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}

struct ConsoleReporter;

#[async_trait]
impl ErrorReporter for ConsoleReporter {
    async fn report(&self, message: &str, severity: Severity) {
        eprintln!("[{severity}] {message}");
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings =
        load_settings(cli.config.as_deref()).context("failed to load jobctl settings")?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }

    match cli.command {
        Command::Submit {
            file,
            fields,
            flow,
            mime_type,
        } => submit(&settings, file, fields, flow.into(), mime_type).await,
        Command::Status { handle } => status(&settings, JobHandle::new(handle)).await,
    }
}

async fn submit(
    settings: &Settings,
    file: PathBuf,
    fields: Vec<(String, String)>,
    flow: JobFlow,
    mime_type: Option<String>,
) -> Result<ExitCode> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();

    let mut attachment = FileAttachment::for_flow(flow, file_name, bytes);
    if let Some(mime_type) = mime_type {
        attachment = attachment.with_mime_type(mime_type);
    }
    let submission = fields
        .into_iter()
        .fold(JobSubmission::new(attachment), |submission, (name, value)| {
            submission.with_field(name, value)
        });

    let client = JobClient::from_settings(settings, Arc::new(ConsoleReporter))
        .context("failed to build job client")?;
    let mut events = BroadcastStream::new(client.subscribe_events());

    // Failures are already printed by the reporter.
    let Ok(handle) = client.submit(flow, submission).await else {
        return Ok(ExitCode::FAILURE);
    };
    println!("job accepted: {handle}");
    if !flow.polls_status() {
        return Ok(ExitCode::SUCCESS);
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(JobEvent::StatusUpdated(snapshot)) => println!("{}", snapshot.text),
                Ok(JobEvent::Stopped { .. }) => break,
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "jobctl: status output lagged behind");
                }
            }
        }
    });

    let reason = tokio::select! {
        reason = client.wait_for_completion() => reason,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!(handle = %handle, "jobctl: interrupted, cancelling");
            client.cancel_polling().await;
            client.wait_for_completion().await
        }
    };
    let _ = printer.await;

    match reason {
        Some(StopReason::Completed) => Ok(ExitCode::SUCCESS),
        Some(reason) => {
            eprintln!("job {handle} did not complete: {reason:?}");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

async fn status(settings: &Settings, handle: JobHandle) -> Result<ExitCode> {
    let backend = HttpJobBackend::new(settings).context("failed to build job client")?;
    let response = backend
        .query_status(&handle)
        .await
        .with_context(|| format!("status query for {handle} failed"))?;
    println!("{}", response.status);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_pairs() {
        assert_eq!(
            parse_field("role=You are a junior author").unwrap(),
            ("role".to_string(), "You are a junior author".to_string())
        );
        assert_eq!(
            parse_field("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_field("empty=").unwrap(), ("empty".to_string(), String::new()));
        assert!(parse_field("no-separator").is_err());
        assert!(parse_field(" =value").is_err());
    }

    #[test]
    fn submit_arguments_parse() {
        let cli = Cli::try_parse_from([
            "jobctl",
            "--server-url",
            "http://jobs.local:5000",
            "submit",
            "--file",
            "book.epub",
            "--flow",
            "convert",
            "--field",
            "title=My Novel",
            "--field",
            "author=Me",
        ])
        .unwrap();

        assert_eq!(cli.server_url.as_deref(), Some("http://jobs.local:5000"));
        match cli.command {
            Command::Submit {
                file, fields, flow, ..
            } => {
                assert_eq!(file, PathBuf::from("book.epub"));
                assert_eq!(JobFlow::from(flow), JobFlow::EbookConversion);
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0], ("title".to_string(), "My Novel".to_string()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flow_defaults_to_finetune() {
        let cli = Cli::try_parse_from(["jobctl", "submit", "--file", "novel.txt"]).unwrap();
        match cli.command {
            Command::Submit { flow, fields, .. } => {
                assert_eq!(flow, FlowArg::Finetune);
                assert!(fields.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
