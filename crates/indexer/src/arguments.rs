use {crate::decoder::address::Network, sqlx::postgres::PgConnectOptions, std::net::SocketAddr};

/// Deployment environment; gates destructive database operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum NodeEnv {
    Production,
    Development,
    Test,
}

impl NodeEnv {
    pub fn allows_destructive_migrations(self) -> bool {
        !matches!(self, Self::Production)
    }
}

#[derive(clap::Parser)]
pub struct Arguments {
    /// Tracing filter directives, e.g. `info,indexer=debug`.
    #[clap(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,

    /// Emit one JSON object per log line instead of human-readable output.
    #[clap(long, env = "LOG_JSON")]
    pub log_json: bool,

    #[clap(long, env = "PG_HOST", default_value = "localhost")]
    pub pg_host: String,

    /// Defaults to the server's conventional port when unset.
    #[clap(long, env = "PG_PORT")]
    pub pg_port: Option<u16>,

    #[clap(long, env = "PG_DATABASE", default_value = "postgres")]
    pub pg_database: String,

    #[clap(long, env = "PG_USER", default_value = "postgres")]
    pub pg_user: String,

    #[clap(long, env = "PG_PASSWORD", default_value = "")]
    pub pg_password: String,

    /// Schema to prepend to the search path, for shared clusters.
    #[clap(long, env = "PG_SCHEMA")]
    pub pg_schema: Option<String>,

    #[clap(long, env = "NODE_ENV", default_value = "development", value_enum)]
    pub node_env: NodeEnv,

    /// Which chain the node follows; selects the address encoding.
    #[clap(long, env = "NETWORK", default_value = "mainnet", value_enum)]
    pub network: Network,

    /// Revert and re-run all migrations on start, dropping all indexed data.
    /// Refused in production.
    #[clap(long, env = "PURGE_DATABASE")]
    pub purge_database: bool,

    /// Where the node connector delivers block events.
    #[clap(long, env = "EVENT_LISTEN_ADDRESS", default_value = "127.0.0.1:3700")]
    pub event_listen_address: SocketAddr,

    #[clap(long, env = "METRICS_ADDRESS", default_value = "0.0.0.0:9153")]
    pub metrics_address: SocketAddr,

    /// Block messages buffered between intake and the ingestion task.
    #[clap(long, env = "INGESTION_QUEUE_SIZE", default_value = "64")]
    pub ingestion_queue_size: usize,
}

impl Arguments {
    pub fn postgres(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.pg_host)
            .database(&self.pg_database)
            .username(&self.pg_user);
        if let Some(port) = self.pg_port {
            options = options.port(port);
        }
        if !self.pg_password.is_empty() {
            options = options.password(&self.pg_password);
        }
        if let Some(schema) = &self.pg_schema {
            options = options.options([("search_path", schema.as_str())]);
        }
        options
    }
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let Self {
            log_filter,
            log_json,
            pg_host,
            pg_port,
            pg_database,
            pg_user,
            pg_password: _,
            pg_schema,
            node_env,
            network,
            purge_database,
            event_listen_address,
            metrics_address,
            ingestion_queue_size,
        } = self;
        writeln!(f, "log_filter: {log_filter}")?;
        writeln!(f, "log_json: {log_json}")?;
        writeln!(f, "pg_host: {pg_host}")?;
        writeln!(f, "pg_port: {pg_port:?}")?;
        writeln!(f, "pg_database: {pg_database}")?;
        writeln!(f, "pg_user: {pg_user}")?;
        writeln!(f, "pg_password: REDACTED")?;
        writeln!(f, "pg_schema: {pg_schema:?}")?;
        writeln!(f, "node_env: {node_env:?}")?;
        writeln!(f, "network: {network:?}")?;
        writeln!(f, "purge_database: {purge_database}")?;
        writeln!(f, "event_listen_address: {event_listen_address}")?;
        writeln!(f, "metrics_address: {metrics_address}")?;
        writeln!(f, "ingestion_queue_size: {ingestion_queue_size}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn defaults_parse() {
        let args = Arguments::parse_from(["indexer"]);
        assert_eq!(args.pg_host, "localhost");
        assert_eq!(args.pg_port, None);
        assert_eq!(args.node_env, NodeEnv::Development);
        assert_eq!(args.network, Network::Mainnet);
        assert!(!args.purge_database);
    }

    #[test]
    fn password_is_redacted_in_display() {
        let args = Arguments::parse_from(["indexer", "--pg-password", "hunter2"]);
        let rendered = args.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn production_refuses_destructive_migrations() {
        assert!(!NodeEnv::Production.allows_destructive_migrations());
        assert!(NodeEnv::Development.allows_destructive_migrations());
        assert!(NodeEnv::Test.allows_destructive_migrations());
    }
}
