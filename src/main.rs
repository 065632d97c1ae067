use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};

use demand_forecast::{
    config,
    errors::ApiError,
    models::{FilterDimension, ForecastRecord},
    queries::filter::{FilterState, DEFAULT_PAGE_SIZE},
    reports::{
        pivot::{CollisionPolicy, PivotOptions},
        WeekDescriptor, MAX_WINDOW_WEEKS,
    },
    AppState,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let context = CliContext::initialize(cli.base_url.clone())?;
    let table = cli.command.table();

    let outcome = match cli.command {
        Commands::Pivot(args) => handle_pivot(&context, args, cli.json).await,
        Commands::Records(args) => handle_records(&context, args, cli.json).await,
        Commands::Summary(args) => handle_summary(&context, args, cli.json).await,
        Commands::Values(args) => handle_values(&context, args, cli.json).await,
        Commands::Metadata => handle_metadata(&context, cli.json).await,
        Commands::Health => handle_health(&context, cli.json).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => report_failure(&err, table, cli.json),
    }
}

#[derive(Parser)]
#[command(
    name = "forecast-dash",
    about = "Browse retail demand forecasts from the terminal",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        help = "Forecast API base URL, overrides the configured one"
    )]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Weekly pivot of predicted quantities per brick and site
    Pivot(PivotArgs),
    /// One page of raw forecast records
    Records(RecordsArgs),
    /// Aggregates for the filtered records
    Summary(FilterArgs),
    /// Distinct values of one column
    Values(ValuesArgs),
    /// Distinct values of every filterable column
    Metadata,
    /// Backend liveness
    Health,
}

/// Table a command renders, so a failed load can still show an empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Pivot,
    Records,
    Plain,
}

impl Commands {
    fn table(&self) -> TableKind {
        match self {
            Commands::Pivot(_) => TableKind::Pivot,
            Commands::Records(_) => TableKind::Records,
            _ => TableKind::Plain,
        }
    }
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    #[arg(long, help = "Free-text search term")]
    search: Option<String>,
    #[arg(long, help = "Zone filter, repeatable")]
    zone: Vec<String>,
    #[arg(long, help = "State filter, repeatable")]
    state: Vec<String>,
    #[arg(long, help = "City filter, repeatable")]
    city: Vec<String>,
    #[arg(long = "site", help = "Site id filter, repeatable")]
    site_id: Vec<String>,
    #[arg(long, help = "Store format filter, repeatable")]
    format: Vec<String>,
    #[arg(long, help = "Brand filter, repeatable")]
    brand: Vec<String>,
    #[arg(long = "brick", help = "Merchandise brick filter, repeatable")]
    mh_brick: Vec<String>,
    #[arg(long, help = "First forecast week (YYYY-MM-DD)")]
    from: Option<NaiveDate>,
    #[arg(long, help = "Last forecast week (YYYY-MM-DD)")]
    to: Option<NaiveDate>,
    #[arg(long, help = "Minimum predicted quantity")]
    min_qty: Option<f64>,
    #[arg(long, help = "Maximum predicted quantity")]
    max_qty: Option<f64>,
}

impl FilterArgs {
    fn to_filter(&self) -> FilterState {
        let mut filter = FilterState::new();
        if let Some(term) = &self.search {
            filter = filter.with_search(term.clone());
        }

        let dimensions = [
            (FilterDimension::Zone, &self.zone),
            (FilterDimension::State, &self.state),
            (FilterDimension::City, &self.city),
            (FilterDimension::SiteId, &self.site_id),
            (FilterDimension::Format, &self.format),
            (FilterDimension::Brand, &self.brand),
            (FilterDimension::MhBrick, &self.mh_brick),
        ];
        for (dimension, values) in dimensions {
            for value in values {
                filter = filter.with_value(dimension, value.clone());
            }
        }

        if self.from.is_some() || self.to.is_some() {
            filter = filter.with_date_range(self.from, self.to);
        }
        if self.min_qty.is_some() || self.max_qty.is_some() {
            filter = filter.with_quantity_range(self.min_qty, self.max_qty);
        }
        filter
    }
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, default_value_t = 1, help = "1-based page number")]
    page: u64,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Rows per page")]
    page_size: u64,
}

#[derive(Args)]
struct RecordsArgs {
    #[command(flatten)]
    filters: FilterArgs,
    #[command(flatten)]
    paging: PageArgs,
}

#[derive(Args)]
struct PivotArgs {
    #[command(flatten)]
    filters: FilterArgs,
    #[command(flatten)]
    paging: PageArgs,
    #[arg(
        long,
        value_parser = clap::value_parser!(u16).range(1..=MAX_WINDOW_WEEKS as i64),
        help = "Number of weeks shown, the current one included (1-53)"
    )]
    weeks: Option<u16>,
    #[arg(long, help = "Reference date of the newest week, defaults to today")]
    as_of: Option<NaiveDate>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Add up quantities landing on the same cell instead of keeping the last"
    )]
    sum: bool,
}

#[derive(Args)]
struct ValuesArgs {
    #[arg(help = "Column name, e.g. brand or mh_brick")]
    column: FilterDimension,
}

struct CliContext {
    state: AppState,
}

impl CliContext {
    fn initialize(base_url: Option<String>) -> Result<Self> {
        let mut config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        if let Some(url) = base_url {
            config.api_base_url = url;
            config.check().context("invalid --base-url")?;
        }
        debug!(target: "forecast_dash", base_url = %config.api_base_url, "using forecast API");

        let state = AppState::from_config(config).context("failed to set up the API client")?;
        state.spawn_cache_janitor();
        Ok(Self { state })
    }
}

async fn handle_pivot(context: &CliContext, args: PivotArgs, json: bool) -> Result<(), ApiError> {
    let configured = &context.state.pivot_options;
    let options = PivotOptions {
        window_weeks: args.weeks.map(usize::from).unwrap_or(configured.window_weeks),
        collision: if args.sum {
            CollisionPolicy::Sum
        } else {
            configured.collision
        },
    };
    let reference = args.as_of.unwrap_or_else(|| Local::now().date_naive());

    let pivot = context
        .state
        .pivot(&args.filters.to_filter(), reference, &options)
        .await?;
    let page = pivot.page(
        usize::try_from(args.paging.page).unwrap_or(usize::MAX),
        usize::try_from(args.paging.page_size).unwrap_or(usize::MAX),
    );

    if json {
        print_json(&page)?;
    } else {
        println!("{}", pivot_header(&pivot.weeks));
        for row in page.rows {
            let cells: Vec<String> = pivot
                .weeks
                .iter()
                .map(|w| {
                    let qty = row.quantity(w.id).unwrap_or(0.0);
                    format!("{:>width$.1}", qty, width = WEEK_CELL)
                })
                .collect();
            println!("{:<24} {:<10} {}", row.mh_brick, row.site_id, cells.join(" "));
        }
        let totals: Vec<String> = pivot
            .week_totals()
            .iter()
            .map(|t| format!("{:>width$.1}", t, width = WEEK_CELL))
            .collect();
        println!("{:<35} {}", "Total", totals.join(" "));
        println!(
            "Page {} of {} • {} rows",
            page.page,
            page.total_pages.max(1),
            page.total_rows
        );
    }
    Ok(())
}

async fn handle_records(
    context: &CliContext,
    args: RecordsArgs,
    json: bool,
) -> Result<(), ApiError> {
    let filter = args
        .filters
        .to_filter()
        .with_page(args.paging.page, args.paging.page_size);
    let response = context.state.forecasts.forecasts(&filter).await?;

    if json {
        print_json(&response)?;
    } else {
        println!("{}", records_header());
        for record in &response.data {
            render_record(record);
        }
        println!(
            "Page {} of {} • {} records",
            response.page,
            response.total_pages().max(1),
            response.total_records
        );
    }
    Ok(())
}

async fn handle_summary(context: &CliContext, args: FilterArgs, json: bool) -> Result<(), ApiError> {
    let summary = context.state.forecasts.summary(&args.to_filter()).await?;

    if json {
        print_json(&summary)?;
    } else {
        let show = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
        println!("Records:          {}", show(summary.total_records.map(|v| v.to_string())));
        println!("Predicted total:  {}", show(summary.total_predicted_qty.map(|v| format!("{:.1}", v))));
        println!("Actual total:     {}", show(summary.total_actual_qty.map(|v| format!("{:.1}", v))));
        println!("Predicted mean:   {}", show(summary.avg_predicted_qty.map(|v| format!("{:.2}", v))));
        println!("Sites:            {}", show(summary.unique_sites.map(|v| v.to_string())));
        println!("Bricks:           {}", show(summary.unique_bricks.map(|v| v.to_string())));
        println!("First week:       {}", show(summary.min_week.map(|v| v.to_string())));
        println!("Last week:        {}", show(summary.max_week.map(|v| v.to_string())));
    }
    Ok(())
}

async fn handle_values(context: &CliContext, args: ValuesArgs, json: bool) -> Result<(), ApiError> {
    let values = context.state.forecasts.unique_values(args.column).await?;

    if json {
        print_json(&values)?;
    } else {
        for value in values.as_strings() {
            println!("{}", value);
        }
    }
    Ok(())
}

async fn handle_metadata(context: &CliContext, json: bool) -> Result<(), ApiError> {
    let metadata = context.state.forecasts.metadata().await?;

    if json {
        print_json(&metadata)?;
    } else {
        for column in metadata.columns.keys() {
            let values = column
                .parse::<FilterDimension>()
                .map(|dimension| metadata.values_for(dimension))
                .unwrap_or_default();
            println!("{:<12} {} values", column, values.len());
        }
    }
    Ok(())
}

async fn handle_health(context: &CliContext, json: bool) -> Result<(), ApiError> {
    let health = context.state.forecasts.health().await?;

    if json {
        print_json(&health)?;
    } else {
        match health.total_records {
            Some(count) => println!("{} ({} records)", health.status, count),
            None => println!("{}", health.status),
        }
        if let Some(message) = &health.message {
            println!("{}", message);
        }
    }
    if !health.is_healthy() {
        warn!(status = %health.status, "forecast service reports unhealthy");
    }
    Ok(())
}

#[derive(Serialize)]
struct FailureReport<'a> {
    error: String,
    message: String,
    retryable: bool,
    status: Option<u16>,
    detail: &'a ApiError,
}

/// Failed loads still render an empty table, then exit non-zero.
fn report_failure(err: &ApiError, table: TableKind, json: bool) -> Result<ExitCode> {
    warn!(error = %err, "forecast request failed");
    if json {
        print_json(&FailureReport {
            error: err.kind().to_string(),
            message: err.user_message(),
            retryable: err.is_retryable(),
            status: err.status(),
            detail: err,
        })?;
    } else {
        if let Some(header) = empty_table_header(table) {
            println!("{}", header);
        }
        println!("No data.");
        eprintln!("{}", err.user_message());
        if err.is_retryable() {
            eprintln!("Run the command again to retry.");
        }
    }
    Ok(ExitCode::FAILURE)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ApiError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wide enough for the longest range label, e.g. "11 Mar - 17 Mar".
const WEEK_CELL: usize = 15;

/// Week labels with their date ranges underneath.
fn pivot_header(weeks: &[WeekDescriptor]) -> String {
    let labels: Vec<String> = weeks
        .iter()
        .map(|w| format!("{:>width$}", w.label, width = WEEK_CELL))
        .collect();
    let ranges: Vec<String> = weeks
        .iter()
        .map(|w| format!("{:>width$}", w.range, width = WEEK_CELL))
        .collect();
    format!(
        "{:<24} {:<10} {}\n{:<35} {}",
        "Brick",
        "Site",
        labels.join(" "),
        "",
        ranges.join(" ")
    )
}

fn records_header() -> String {
    format!(
        "{:<12} {:<10} {:<24} {:<16} {:>10} {:>10}",
        "Week", "Site", "Brick", "Brand", "Predicted", "Actual"
    )
}

fn empty_table_header(table: TableKind) -> Option<String> {
    match table {
        TableKind::Pivot => Some(pivot_header(&[])),
        TableKind::Records => Some(records_header()),
        TableKind::Plain => None,
    }
}

fn render_record(record: &ForecastRecord) {
    println!(
        "{:<12} {:<10} {:<24} {:<16} {:>10.1} {:>10}",
        record
            .forecast_week
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string()),
        record.site_id,
        record.mh_brick.as_deref().unwrap_or("-"),
        record.brand.as_deref().unwrap_or("-"),
        record.predicted_qty,
        record
            .actual_qty
            .map(|q| format!("{:.1}", q))
            .unwrap_or_else(|| "-".to_string()),
    );
}
