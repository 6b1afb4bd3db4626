pub mod arguments;
pub mod decoder;
pub mod ingestion;
pub mod intake;
pub mod notifier;
pub mod run;

use clap::Parser;

pub async fn start(args: impl Iterator<Item = String>) {
    let args = arguments::Arguments::parse_from(args);
    observe::tracing::initialize(&args.log_filter, args.log_json);
    tracing::info!("running chain indexing sidecar with validated arguments:\n{args}");
    if let Err(err) = run::run(args).await {
        tracing::error!(?err, "sidecar terminated");
        std::process::exit(1);
    }
}
