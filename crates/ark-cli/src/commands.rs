use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use ark_batch::{BatchCoordinator, BatchEvent, BatchSnapshot, UnitState};
use ark_crypto::{Digest, DigestEngine};
use ark_fixity::{FixityResult, FixityVerifier, SubmittedManifest};
use ark_format::FormatIdentifier;
use ark_server::{ArkServer, ServerConfig};
use ark_storage::{AggregatedStorageState, StorageStateAggregator};
use ark_store::InMemoryRepository;
use ark_types::BatchState;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Ingest(args) => cmd_ingest(config, args, format).await,
        Command::Digest(args) => cmd_digest(args, format),
        Command::Verify(args) => cmd_verify(args, format),
        Command::Manifest(args) => cmd_manifest(args, format),
        Command::Identify(args) => cmd_identify(&config, args, format),
        Command::Storage(_) => cmd_storage(&config, format).await,
        Command::Serve(args) => cmd_serve(config, args).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading configuration");
            ServerConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))
        }
        None => Ok(ServerConfig::default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// File checks do not touch storage, so the verifier gets an empty
/// aggregator and repository.
fn local_verifier() -> FixityVerifier {
    FixityVerifier::new(
        DigestEngine::new(),
        Arc::new(StorageStateAggregator::new()),
        Arc::new(InMemoryRepository::new()),
    )
}

fn colored_state(state: BatchState) -> colored::ColoredString {
    match state {
        BatchState::Completed => state.as_str().green().bold(),
        BatchState::Canceled => state.as_str().red().bold(),
        BatchState::Suspended => state.as_str().yellow().bold(),
        BatchState::New | BatchState::Running => state.as_str().cyan(),
    }
}

fn colored_unit(state: UnitState) -> colored::ColoredString {
    match state {
        UnitState::Done => state.as_str().green(),
        UnitState::Failed => state.as_str().red(),
        _ => state.as_str().yellow(),
    }
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::BatchStateChanged { state, .. } => {
            println!("{} batch {}", "»".dimmed(), colored_state(*state));
        }
        BatchEvent::UnitStateChanged { sip_id, state, .. } => {
            println!("  {} {}", sip_id.to_string().bold(), colored_unit(*state));
        }
        BatchEvent::UnitFailed {
            sip_id,
            stage,
            message,
            ..
        } => {
            println!(
                "  {} {} failed at {}: {}",
                "✗".red(),
                sip_id.to_string().bold(),
                stage,
                message
            );
        }
        BatchEvent::FixityMismatch { sip_id, result, .. } => {
            println!(
                "  {} {} fixity mismatch on {}",
                "!".yellow().bold(),
                sip_id.to_string().bold(),
                result.subject
            );
        }
    }
}

fn print_snapshot(snapshot: &BatchSnapshot) {
    let counts = snapshot.counts();
    println!(
        "Batch {} {}: {} done, {} failed, {} pending",
        snapshot.batch_id.to_string().bold(),
        colored_state(snapshot.state),
        counts.done.to_string().green(),
        counts.failed.to_string().red(),
        counts.pending
    );
    for unit in &snapshot.units {
        let detail = match (&unit.failure, unit.outputs.version) {
            (Some(failure), _) => format!("{}: {}", failure.stage, failure.message),
            (None, Some(version)) => {
                format!("v{version} on {} node(s)", unit.outputs.stored_on.len())
            }
            (None, None) => String::new(),
        };
        println!(
            "  {:<24} {:<16} {}",
            unit.sip_id.to_string(),
            colored_unit(unit.state),
            detail.dimmed()
        );
    }
}

async fn cmd_ingest(
    config: ServerConfig,
    args: IngestArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut ingest = config.ingest;
    if let Some(workers) = args.workers {
        ingest.workers = workers;
    }
    let coordinator = BatchCoordinator::from_config(ingest)?;
    let batch_id = coordinator
        .create_batch_from_dir(&args.root)
        .with_context(|| format!("reading SIPs from {}", args.root.display()))?;
    let progress = args.progress && format == OutputFormat::Text;
    let mut events = coordinator.subscribe();
    coordinator.start(batch_id).await?;

    let wait = coordinator.wait(batch_id);
    tokio::pin!(wait);
    let snapshot = loop {
        tokio::select! {
            settled = &mut wait => break settled?,
            event = events.recv(), if progress => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    println!("  {} {skipped} event(s) skipped", "…".dimmed());
                }
                Err(RecvError::Closed) => {}
            },
        }
    };
    if progress {
        while let Ok(event) = events.try_recv() {
            print_event(&event);
        }
    }

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Text => print_snapshot(&snapshot),
    }
    let failed = snapshot.counts().failed;
    if failed > 0 {
        bail!("{failed} SIP(s) failed to ingest");
    }
    Ok(())
}

fn cmd_digest(args: DigestArgs, format: OutputFormat) -> anyhow::Result<()> {
    let digest = DigestEngine::new().digest(&args.path, args.algorithm.into())?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "path": args.path,
            "digest": digest,
        })),
        OutputFormat::Text => {
            println!("{}  {}", digest.hex(), args.path.display());
            Ok(())
        }
    }
}

fn print_fixity(result: &FixityResult) {
    if result.matched {
        println!("{} {}", "✓".green().bold(), result.subject);
    } else {
        let computed = result
            .computed
            .as_ref()
            .map_or_else(|| "missing".to_string(), Digest::to_string);
        println!("{} {}", "✗".red().bold(), result.subject);
        println!("  expected {}", result.expected.to_string().yellow());
        println!("  computed {}", computed.red());
    }
}

fn cmd_verify(args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let expected = match args.algorithm {
        Some(algorithm) => Digest::parse(algorithm.into(), &args.digest)?,
        None => Digest::parse_prefixed(&args.digest)
            .context("prefix the digest with its algorithm or pass --algorithm")?,
    };
    let result = local_verifier().check_file(&args.path, &expected)?;
    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_fixity(&result),
    }
    if !result.matched {
        bail!("fixity mismatch for {}", args.path.display());
    }
    Ok(())
}

fn cmd_manifest(args: ManifestArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(manifest) = SubmittedManifest::discover(&args.sip, args.algorithm.into())? else {
        bail!("no checksum manifest in {}", args.sip.display());
    };
    let results = local_verifier().check_manifest(&args.sip, &manifest)?;
    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Text => {
            println!(
                "Manifest {} ({} entries)",
                manifest.path.display().to_string().bold(),
                manifest.entries.len()
            );
            results.iter().for_each(print_fixity);
        }
    }
    let mismatched = results.iter().filter(|r| !r.matched).count();
    if mismatched > 0 {
        bail!("{mismatched} file(s) do not match the manifest");
    }
    Ok(())
}

fn cmd_identify(
    config: &ServerConfig,
    args: IdentifyArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let identifier = FormatIdentifier::from_config(config.ingest.signature_db.as_deref())?;
    let formats = identifier.analyze(&args.path)?;
    match format {
        OutputFormat::Json => print_json(&formats)?,
        OutputFormat::Text => {
            for (file, detected) in &formats {
                let puid = if detected.is_unknown() {
                    detected.puid.red()
                } else {
                    detected.puid.cyan()
                };
                println!("{:<12} {:<28} {}", puid, detected.name, file);
            }
        }
    }
    Ok(())
}

fn print_storage(state: &AggregatedStorageState) {
    let status = if state.running {
        "running".green().bold()
    } else {
        "degraded".red().bold()
    };
    println!(
        "Storage {}: {} of {} bytes free",
        status, state.free_bytes, state.capacity_bytes
    );
    for node in &state.nodes {
        let marker = if node.unreachable {
            "unreachable".red()
        } else if node.running {
            "running".green()
        } else {
            "stopped".yellow()
        };
        println!(
            "  {:<16} {:<12} {} / {}",
            node.node_id.to_string(),
            marker,
            node.free_bytes,
            node.capacity_bytes
        );
    }
}

async fn cmd_storage(config: &ServerConfig, format: OutputFormat) -> anyhow::Result<()> {
    let aggregator = config.ingest.build_aggregator()?;
    let state = aggregator.aggregate_all().await;
    match format {
        OutputFormat::Json => print_json(&state),
        OutputFormat::Text => {
            print_storage(&state);
            Ok(())
        }
    }
}

async fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind
            .parse()
            .with_context(|| format!("invalid bind address {bind:?}"))?;
    }
    println!("Ark server on {}", config.bind_addr.to_string().bold());
    ArkServer::new(config)?.serve().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_crypto::DigestAlgorithm;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[tokio::test]
    async fn verify_accepts_matching_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"fixity").unwrap();
        let digest = DigestEngine::new().digest_bytes(b"fixity", DigestAlgorithm::Sha256);

        let path = file.to_str().unwrap();
        let prefixed = digest.to_string();
        run_command(parse(&["ark", "verify", path, &prefixed])).await.unwrap();
        run_command(parse(&["ark", "verify", path, digest.hex(), "-a", "sha256"]))
            .await
            .unwrap();

        let wrong = DigestEngine::new().digest_bytes(b"other", DigestAlgorithm::Sha256);
        let err = run_command(parse(&["ark", "verify", path, &wrong.to_string()]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fixity mismatch"));
    }

    #[tokio::test]
    async fn manifest_command_reports_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let good = DigestEngine::new().digest_bytes(b"a", DigestAlgorithm::Sha256);
        std::fs::write(
            dir.path().join("manifest-sha256.txt"),
            format!("{}  a.txt\n", good.hex()),
        )
        .unwrap();
        let sip = dir.path().to_str().unwrap();
        run_command(parse(&["ark", "manifest", sip])).await.unwrap();

        std::fs::write(dir.path().join("a.txt"), b"changed").unwrap();
        assert!(run_command(parse(&["ark", "manifest", sip])).await.is_err());
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sip = dir.path().to_str().unwrap();
        let err = run_command(parse(&["ark", "manifest", sip])).await.unwrap_err();
        assert!(err.to_string().contains("no checksum manifest"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ingest_runs_a_batch_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["one", "two"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("doc.txt"), name).unwrap();
        }
        let root = dir.path().to_str().unwrap();
        run_command(parse(&["ark", "ingest", root, "--progress"])).await.unwrap();

        std::fs::create_dir(dir.path().join("three")).unwrap();
        let err = run_command(parse(&["ark", "ingest", root])).await.unwrap_err();
        assert!(err.to_string().contains("1 SIP(s) failed"));
    }

    #[tokio::test]
    async fn missing_config_file_is_reported() {
        let err = run_command(parse(&["ark", "storage", "-c", "/nonexistent/ark.toml"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("loading configuration"));
    }
}
