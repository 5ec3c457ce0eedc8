use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "table_mirror")]
#[command(about = "Mirror a PostgreSQL table into a Google Sheets spreadsheet, once or on an interval")]
#[command(version)]
pub struct Args {
    /// Sync once then exit
    #[arg(long, conflicts_with = "watch")]
    pub once: bool,

    /// Keep syncing every interval until Ctrl+C / SIGTERM
    #[arg(long)]
    pub watch: bool,

    /// Check both connections, describe the table and exit without syncing
    #[arg(long, conflicts_with_all = ["once", "watch"])]
    pub check: bool,

    /// Table to mirror (overrides TABLE_NAME)
    #[arg(long, value_name = "TABLE")]
    pub table: Option<String>,

    /// Spreadsheet title (overrides SPREADSHEET_NAME)
    #[arg(long, value_name = "NAME")]
    pub spreadsheet: Option<String>,

    /// Minutes between syncs in watch mode (overrides SYNC_INTERVAL_MINUTES)
    #[arg(long, value_name = "MINUTES")]
    pub interval_minutes: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to config file
    #[arg(long, default_value = "config/config.toml")]
    pub config: String,
}
