use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ark_crypto::DigestAlgorithm;

#[derive(Parser)]
#[command(
    name = "ark",
    about = "Ark -- batch ingest and fixity for digital archives",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML file with `bind_addr` and an `[ingest]` table
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum AlgorithmArg {
    Sha256,
    Sha512,
    Blake3,
}

impl From<AlgorithmArg> for DigestAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Sha256 => Self::Sha256,
            AlgorithmArg::Sha512 => Self::Sha512,
            AlgorithmArg::Blake3 => Self::Blake3,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest every SIP under a directory as one batch
    Ingest(IngestArgs),
    /// Compute the digest of a file
    Digest(DigestArgs),
    /// Check a file against an expected digest
    Verify(VerifyArgs),
    /// Check a SIP against its submitted checksum manifest
    Manifest(ManifestArgs),
    /// Identify the format of a file or every file under a directory
    Identify(IdentifyArgs),
    /// Show aggregated storage node health
    Storage(StorageArgs),
    /// Start the ingest control server
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    /// Directory with one SIP per entry
    pub root: PathBuf,
    /// Override the configured worker count
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Print unit events while the batch runs
    #[arg(long)]
    pub progress: bool,
}

#[derive(Args)]
pub struct DigestArgs {
    pub path: PathBuf,
    #[arg(short, long, default_value = "sha256")]
    pub algorithm: AlgorithmArg,
}

#[derive(Args)]
pub struct VerifyArgs {
    pub path: PathBuf,
    /// `<algorithm>:<hex>`, or bare hex with `--algorithm`
    pub digest: String,
    #[arg(short, long)]
    pub algorithm: Option<AlgorithmArg>,
}

#[derive(Args)]
pub struct ManifestArgs {
    /// SIP directory containing `manifest-<algorithm>.txt`
    pub sip: PathBuf,
    /// Manifest algorithm to look for first
    #[arg(short, long, default_value = "sha256")]
    pub algorithm: AlgorithmArg,
}

#[derive(Args)]
pub struct IdentifyArgs {
    pub path: PathBuf,
}

#[derive(Args)]
pub struct StorageArgs {}

#[derive(Args)]
pub struct ServeArgs {
    /// Override the configured bind address
    #[arg(long)]
    pub bind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ingest() {
        let cli = Cli::try_parse_from(["ark", "ingest", "/in", "-w", "8"]).unwrap();
        if let Command::Ingest(args) = cli.command {
            assert_eq!(args.root, PathBuf::from("/in"));
            assert_eq!(args.workers, Some(8));
            assert!(!args.progress);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_digest_defaults_to_sha256() {
        let cli = Cli::try_parse_from(["ark", "digest", "file.bin"]).unwrap();
        if let Command::Digest(args) = cli.command {
            assert_eq!(DigestAlgorithm::from(args.algorithm), DigestAlgorithm::Sha256);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_verify_with_algorithm() {
        let cli = Cli::try_parse_from(["ark", "verify", "f", "abcd", "-a", "blake3"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.digest, "abcd");
            assert_eq!(args.algorithm, Some(AlgorithmArg::Blake3));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from([
            "ark", "storage", "--format", "json", "--config", "ark.toml", "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Storage(_)));
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("ark.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_serve_bind() {
        let cli = Cli::try_parse_from(["ark", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(Cli::try_parse_from(["ark", "digest", "f", "-a", "md5"]).is_err());
    }
}
