use std::path::PathBuf;

use clap::Parser;
use config::shared::{
    ColumnNaming, ConversionMode, DestinationConfig, PipelineConfig, ReplicatorConfig,
    SourceConfig, TableSelection, TlsConfig,
};

/// Replicates DynamoDB tables into Postgres or Citus: schema, snapshot, then the change stream.
#[derive(Debug, Parser)]
#[command(name = "replicator", version)]
pub struct Args {
    /// Tables to replicate, comma separated. Every table is replicated when omitted.
    #[arg(short, long = "table", value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Destination connection string. The SQL is printed to stdout when omitted.
    #[arg(long)]
    pub postgres_url: Option<String>,

    /// Skip creating the destination tables.
    #[arg(long)]
    pub no_schema: bool,

    /// Skip the snapshot load.
    #[arg(long)]
    pub no_data: bool,

    /// Skip following the change streams.
    #[arg(long)]
    pub no_changes: bool,

    /// Maximum read capacity units consumed per second and table by the snapshot.
    #[arg(long, default_value_t = config::shared::ScanConfig::DEFAULT_MAX_RATE)]
    pub scan_rate: f64,

    /// Number of destination connections applying changes.
    #[arg(long, default_value_t = DestinationConfig::DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Lower-case attribute names to build column names.
    #[arg(long)]
    pub lower_case_column_names: bool,

    /// Create plain Postgres tables instead of Citus distributed tables.
    #[arg(long)]
    pub no_distributed: bool,

    /// Store every item whole in a `data` jsonb column next to the key columns.
    #[arg(long)]
    pub jsonb_mode: bool,

    #[arg(long, default_value = SourceConfig::DEFAULT_REGION)]
    pub region: String,

    /// Source endpoint override, e.g. a local emulator.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Load the configuration from this directory instead of the flags above.
    #[arg(long, value_name = "DIR")]
    pub from_config: Option<PathBuf>,
}

impl Args {
    /// Builds the configuration described by the flags.
    pub fn to_config(&self) -> ReplicatorConfig {
        let tables = if self.tables.is_empty() {
            TableSelection::All
        } else {
            TableSelection::Names(self.tables.clone())
        };

        let destination = match &self.postgres_url {
            Some(url) => DestinationConfig::Postgres {
                connection_string: url.clone().into(),
                pool_size: self.pool_size,
                tls: TlsConfig::default(),
            },
            None => DestinationConfig::Stdout,
        };

        let mut pipeline = PipelineConfig::default();
        pipeline.phases.schema = !self.no_schema;
        pipeline.phases.data = !self.no_data;
        pipeline.phases.changes = !self.no_changes;
        pipeline.scan.max_rate = self.scan_rate;
        pipeline.distributed = !self.no_distributed;
        if self.lower_case_column_names {
            pipeline.column_naming = ColumnNaming::LowerCase;
        }
        if self.jsonb_mode {
            pipeline.conversion_mode = ConversionMode::Jsonb;
        }

        ReplicatorConfig {
            source: SourceConfig {
                region: self.region.clone(),
                endpoint: self.endpoint.clone(),
                tables,
            },
            destination,
            pipeline,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_replicate_everything_to_stdout() {
        let config = Args::try_parse_from(["replicator"]).unwrap().to_config();

        assert_eq!(config.source.tables, TableSelection::All);
        assert_eq!(config.source.region, "us-east-1");
        assert!(matches!(config.destination, DestinationConfig::Stdout));
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn flags_are_mapped_to_the_configuration() {
        let config = Args::try_parse_from([
            "replicator",
            "-t",
            "orders,users",
            "--postgres-url",
            "postgres://localhost/replica",
            "--no-data",
            "--scan-rate",
            "10",
            "--pool-size",
            "4",
            "--lower-case-column-names",
            "--no-distributed",
            "--jsonb-mode",
        ])
        .unwrap()
        .to_config();

        assert_eq!(
            config.source.tables,
            TableSelection::Names(vec!["orders".to_owned(), "users".to_owned()])
        );
        let DestinationConfig::Postgres {
            connection_string,
            pool_size,
            ..
        } = &config.destination
        else {
            panic!("expected a postgres destination");
        };
        assert_eq!(connection_string.expose_secret(), "postgres://localhost/replica");
        assert_eq!(*pool_size, 4);
        assert!(config.pipeline.phases.schema);
        assert!(!config.pipeline.phases.data);
        assert!(config.pipeline.phases.changes);
        assert_eq!(config.pipeline.scan.max_rate, 10.0);
        assert_eq!(config.pipeline.column_naming, ColumnNaming::LowerCase);
        assert_eq!(config.pipeline.conversion_mode, ConversionMode::Jsonb);
        assert!(!config.pipeline.distributed);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = Args::try_parse_from(["replicator", "--tables-all"]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn scan_rate_must_be_a_number() {
        let err = Args::try_parse_from(["replicator", "--scan-rate", "fast"]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
