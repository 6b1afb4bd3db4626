use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Install the global tracing subscriber.
///
/// `filter` uses the usual `EnvFilter` directive syntax
/// (`info,indexer=debug`). `use_json` switches to one-object-per-line output
/// for log collectors. Panics on an invalid filter or a second call, both of
/// which are startup bugs.
pub fn initialize(filter: &str, use_json: bool) {
    let filter = EnvFilter::try_new(filter).expect("invalid log filter");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NONE);
    if use_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
