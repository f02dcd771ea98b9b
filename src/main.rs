use bundle_analysis::analyser::{Analyser, AnalyserOptions};
use bundle_analysis::config::{Command, Opts, DEFAULT_LIST_REPOSITORY};
use bundle_analysis::extract::RegistryBundleReader;
use bundle_analysis::format;
use bundle_analysis::inspect::RegistryInspector;
use bundle_analysis::lister;
use oci_inspect::secrets::RegistryAuth;
use oci_inspect::{Client, ImageRef};
use std::sync::Arc;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::from_args();

    // Ctrl-C flips the token; in-flight registry requests are dropped and
    // the current command fails with a cancellation error.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Received interrupt, cancelling");
                cancel.cancel();
            }
        });
    }

    match opts.command {
        Command::Analyse {
            bundle,
            format,
            stream,
            concurrency,
            skip_commit_dates,
        } => {
            let inspector = Arc::new(RegistryInspector::new(
                Client::default(),
                RegistryAuth::Anonymous,
                cancel.clone(),
            ));
            let reader = Arc::new(RegistryBundleReader::new(
                Client::default(),
                RegistryAuth::Anonymous,
            ));
            let analyser = Analyser::new(
                inspector,
                reader,
                AnalyserOptions {
                    stream,
                    concurrency,
                    fetch_commit_dates: !skip_commit_dates,
                },
            );

            let analysis = analyser.analyse(&bundle, cancel).await?;
            print!("{}", format::format_analysis(&analysis, format)?);
        }
        Command::List {
            repository,
            limit,
            format,
        } => {
            let repo = repository.as_deref().unwrap_or(DEFAULT_LIST_REPOSITORY);
            let repo_ref = parse_repository(repo)?;
            let inspector = Arc::new(RegistryInspector::new(
                Client::default(),
                RegistryAuth::Anonymous,
                cancel.clone(),
            ));

            let bundles = lister::list_latest_bundles(inspector, &repo_ref, limit, cancel).await?;
            print!("{}", format::format_bundles(&bundles, format)?);
        }
    }

    Ok(())
}

/// Parses a repository argument, tolerating a trailing tag or digest; only
/// the registry and repository parts are kept.
fn parse_repository(repo: &str) -> anyhow::Result<ImageRef> {
    // A bare repository has no tag, which the strict reference parser
    // rejects; a placeholder tag makes either form parse.
    let image = repo
        .parse::<ImageRef>()
        .or_else(|_| format!("{}:latest", repo).parse::<ImageRef>())?;
    Ok(ImageRef::from_parts(
        image.registry(),
        image.repository(),
        None,
        None,
    ))
}
