use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use contract_scanner::config::cli::CliScannerConfig;
use url::Url;

const OUTPUT_HELP_HEADING: &str = "Output options";

/// Finds contract deployments on an Ethereum-compatible chain.
#[derive(Parser)]
#[command(version = contract_scanner::version(), propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,

    /// The node RPC URL.
    #[arg(short = 'u', long, env = "SCANNER_RPC_URL", value_hint = ValueHint::Url, global = true)]
    pub(crate) rpc_url: Option<Url>,

    /// Alchemy API key, used to reach Alchemy's mainnet endpoint when no RPC
    /// URL is given.
    #[arg(long, env = "ALCHEMY_API_KEY", hide_env_values = true, global = true)]
    pub(crate) alchemy_api_key: Option<String>,

    /// File receiving contract creation records. Defaults to
    /// `contracts.jsonl` or `contract_creations.csv` depending on the format.
    #[arg(
        short,
        long,
        env = "SCANNER_OUTPUT",
        value_hint = ValueHint::FilePath,
        help_heading = OUTPUT_HELP_HEADING,
        global = true
    )]
    pub(crate) output: Option<PathBuf>,

    /// Format of the output file.
    #[arg(
        short,
        long,
        env = "SCANNER_FORMAT",
        value_enum,
        default_value_t = OutputFormat::Jsonl,
        help_heading = OUTPUT_HELP_HEADING,
        global = true
    )]
    pub(crate) format: OutputFormat,

    /// Keep records in memory instead of writing them.
    #[arg(long, help_heading = OUTPUT_HELP_HEADING, global = true)]
    pub(crate) dry_run: bool,

    #[clap(flatten)]
    pub(crate) scanner_config: CliScannerConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// One JSON object per line, including ingested heights.
    Jsonl,
    /// The columns of the classic `contract_creations.csv` export.
    Csv,
}

impl OutputFormat {
    pub(crate) fn default_output(self) -> PathBuf {
        match self {
            OutputFormat::Jsonl => PathBuf::from("contracts.jsonl"),
            OutputFormat::Csv => PathBuf::from("contract_creations.csv"),
        }
    }
}

impl Cli {
    /// The output path, falling back to the format's default file name.
    pub(crate) fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.format.default_output())
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scans an interval of blocks, then reports.
    Range {
        /// `start..end`, `start..=end`, a single block, or `start..` to keep
        /// following the chain.
        #[arg(required_unless_present = "recent", conflicts_with = "recent")]
        interval: Option<String>,
        /// Scan the given number of most recent blocks instead.
        #[arg(short, long)]
        recent: Option<u64>,
    },
    /// Follows the chain head until interrupted.
    Follow {
        /// First block to scan. Defaults to the next block mined.
        #[arg(short = 's', long, env = "SCANNER_START_BLOCK")]
        from: Option<u64>,
        /// Stop after this many seconds.
        #[arg(short, long, env = "SCANNER_SESSION_TIMEOUT_SECS")]
        duration_secs: Option<u64>,
    },
    /// Checks that the node is reachable and prints the chain head.
    Probe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_and_follow() {
        let cli = Cli::try_parse_from(["contract-scanner", "range", "100..=110"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Range { interval: Some(ref i), recent: None } if i == "100..=110"
        ));

        let cli = Cli::try_parse_from([
            "contract-scanner",
            "follow",
            "--from",
            "42",
            "--duration-secs",
            "30",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert!(matches!(
            cli.command,
            Command::Follow {
                from: Some(42),
                duration_secs: Some(30)
            }
        ));
    }

    #[test]
    fn output_defaults_follow_the_format() {
        let cli = Cli::try_parse_from(["contract-scanner", "probe"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Jsonl);
        assert_eq!(cli.output_path(), PathBuf::from("contracts.jsonl"));

        let cli = Cli::try_parse_from(["contract-scanner", "range", "1..2", "--format", "csv"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Csv);
        assert_eq!(cli.output_path(), PathBuf::from("contract_creations.csv"));

        let cli = Cli::try_parse_from([
            "contract-scanner",
            "range",
            "1..2",
            "-f",
            "csv",
            "-o",
            "out/deployments.csv",
        ])
        .unwrap();
        assert_eq!(cli.output_path(), PathBuf::from("out/deployments.csv"));
        assert!(Cli::try_parse_from(["contract-scanner", "probe", "--format", "xml"]).is_err());
    }

    #[test]
    fn range_needs_an_interval() {
        assert!(Cli::try_parse_from(["contract-scanner", "range"]).is_err());
        assert!(Cli::try_parse_from(["contract-scanner", "range", "1..2", "--recent", "5"]).is_err());
    }
}
