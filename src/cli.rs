use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "blobctl",
    about = "Socket command controller for the blob analyzer autofeeder"
)]
pub struct Cli {
    /// TCP port the command socket listens on
    #[arg(long, default_value_t = 8888)]
    pub port: u16,
    /// Simulated recipe-load time in milliseconds
    #[arg(long, default_value_t = 2_000)]
    pub sim_load_ms: u64,
    /// Simulated stop/flush settle time in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub sim_settle_ms: u64,
    /// Log filter (tracing env-filter syntax, e.g. "debug" or "blobctl=debug")
    #[arg(long, default_value = "info")]
    pub log: String,
}
