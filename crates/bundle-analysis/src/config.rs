//! CLI options for the bundle analysis tool.

use crate::format::OutputFormat;
use crate::tenant::ReleaseStream;
use structopt::StructOpt;

/// The default repository `list` enumerates.
pub const DEFAULT_LIST_REPOSITORY: &str =
    "quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-operator-bundle-ystream";

/// CLI options for bpfman-catalog
///
/// These can be parsed from args using `Opts::from_args()`
#[derive(StructOpt, Clone, Debug)]
#[structopt(
    name = "bpfman-catalog",
    about = "Provenance and accessibility analysis for bpfman operator bundles"
)]
pub struct Opts {
    #[structopt(subcommand)]
    /// What to do.
    pub command: Command,
}

/// The tool's subcommands.
#[derive(StructOpt, Clone, Debug)]
pub enum Command {
    /// Analyse a bundle image: where its declared images live and what
    /// provenance they carry
    Analyse {
        /// Bundle image reference (tag or digest form)
        #[structopt(name = "bundle-ref")]
        bundle: String,

        #[structopt(
            long = "format",
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: OutputFormat,

        #[structopt(
            long = "stream",
            default_value = "ystream",
            help = "Release stream for tenant workspace fallback (ystream, zstream)"
        )]
        stream: ReleaseStream,

        #[structopt(
            long = "concurrency",
            default_value = "10",
            help = "Concurrent image inspections"
        )]
        concurrency: usize,

        #[structopt(
            long = "skip-commit-dates",
            help = "Do not look up commit dates on the forge"
        )]
        skip_commit_dates: bool,
    },

    /// List the most recent bundle builds in a repository
    List {
        /// Bundle repository to list (defaults to the y-stream tenant
        /// workspace)
        #[structopt(name = "repo-ref")]
        repository: Option<String>,

        #[structopt(
            long = "limit",
            default_value = "5",
            help = "Number of latest bundles to list"
        )]
        limit: usize,

        #[structopt(
            long = "format",
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: OutputFormat,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analyser::DEFAULT_CONCURRENCY;

    #[test]
    fn analyse_defaults() {
        let opts = Opts::from_iter(vec![
            "bpfman-catalog",
            "analyse",
            "quay.io/bpfman/bpfman-operator-bundle:latest",
        ]);
        match opts.command {
            Command::Analyse {
                bundle,
                format,
                stream,
                concurrency,
                skip_commit_dates,
            } => {
                assert_eq!("quay.io/bpfman/bpfman-operator-bundle:latest", bundle);
                assert_eq!(OutputFormat::Text, format);
                assert_eq!(ReleaseStream::YStream, stream);
                assert_eq!(DEFAULT_CONCURRENCY, concurrency);
                assert!(!skip_commit_dates);
            }
            other => panic!("expected analyse, got {:?}", other),
        }
    }

    #[test]
    fn analyse_flags() {
        let opts = Opts::from_iter(vec![
            "bpfman-catalog",
            "analyse",
            "quay.io/bpfman/bpfman-operator-bundle:latest",
            "--format",
            "json",
            "--stream",
            "zstream",
            "--concurrency",
            "4",
            "--skip-commit-dates",
        ]);
        match opts.command {
            Command::Analyse {
                format,
                stream,
                concurrency,
                skip_commit_dates,
                ..
            } => {
                assert_eq!(OutputFormat::Json, format);
                assert_eq!(ReleaseStream::ZStream, stream);
                assert_eq!(4, concurrency);
                assert!(skip_commit_dates);
            }
            other => panic!("expected analyse, got {:?}", other),
        }
    }

    #[test]
    fn list_defaults() {
        let opts = Opts::from_iter(vec!["bpfman-catalog", "list"]);
        match opts.command {
            Command::List {
                repository,
                limit,
                format,
            } => {
                assert_eq!(None, repository);
                assert_eq!(5, limit);
                assert_eq!(OutputFormat::Text, format);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }
}
