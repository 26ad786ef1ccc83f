use std::fmt::Display;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use weather_feeds::{
    condition::{self, Phase},
    config::{LOG_ENV, RuntimeConfig},
    error::{AppError, ErrorKind, FeedError},
    feeds::{self, nws},
    governance::{UpdatePolicy, WeatherService},
    icons::{self, IconPack},
    location::{Coordinates, Location},
    model::{FeedSource, Field, ForecastPeriod, ForecastSet, Units},
    na::NA_TEXT,
    persist::StateStore,
    providers::{FeedFetcher, HttpFetcher, redact_secrets},
    registry::LocationRegistry,
    search::{self, LocationQuery, SearchKind},
};

const ENVELOPE_SCHEMA_VERSION: &str = "v1";
const DEFAULT_LOG_FILTER: &str = "warn";
const ERROR_CODE_USER_INVALID_INPUT: &str = "user.invalid_input";
const ERROR_CODE_USER_UNKNOWN_LOCATION: &str = "user.unknown_location";
const ERROR_CODE_USER_DUPLICATE_LOCATION: &str = "user.duplicate_location";
const ERROR_CODE_USER_MISSING_API_KEY: &str = "user.missing_api_key";
const ERROR_CODE_USER_NO_ICON_SETS: &str = "user.no_icon_sets";
const ERROR_CODE_RUNTIME_PROVIDER_INIT: &str = "runtime.provider_init_failed";
const ERROR_CODE_RUNTIME_FEED: &str = "runtime.feed_failed";
const ERROR_CODE_RUNTIME_STATE: &str = "runtime.state_failed";
const ERROR_CODE_RUNTIME_SERIALIZE: &str = "runtime.serialize_failed";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Weather feed normalizer with governed per-location updates"
)]
struct Cli {
    /// Print the JSON envelope instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a saved feed document and print the normalized forecast.
    Parse {
        #[arg(long, value_enum)]
        feed: FeedArg,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = UnitsArg::Standard)]
        units: UnitsArg,
    },
    /// Manage configured locations.
    Location {
        #[command(subcommand)]
        action: LocationCommand,
    },
    /// Look up locations through OpenWeatherMap geocoding.
    Search {
        phrase: String,
        #[arg(long, value_enum, default_value_t = SearchKindArg::Name)]
        kind: SearchKindArg,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, value_enum, default_value_t = UnitsArg::Standard)]
        units: UnitsArg,
    },
    /// Run the governed update for one location, or every location.
    Update { id: Option<String> },
    /// Print the cached forecast of a location (the default when omitted).
    Show { id: Option<String> },
    /// Resolve the icon asset for a condition code.
    Icon {
        #[arg(allow_negative_numbers = true)]
        code: i32,
        #[arg(long)]
        night: bool,
    },
    /// List installed icon sets.
    IconSets {
        /// Print the set that follows CURRENT.
        #[arg(long)]
        next: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum LocationCommand {
    /// Register a location by coordinates.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        country: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, value_enum, default_value_t = UnitsArg::Standard)]
        units: UnitsArg,
        /// Make the new location the default.
        #[arg(long)]
        default: bool,
    },
    Remove {
        id: String,
    },
    List,
    Default {
        id: String,
    },
    Units {
        id: String,
        #[arg(value_enum)]
        units: UnitsArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FeedArg {
    Wu,
    Nws,
    NwsZip,
    Owm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UnitsArg {
    Metric,
    Standard,
}

impl From<UnitsArg> for Units {
    fn from(value: UnitsArg) -> Self {
        match value {
            UnitsArg::Metric => Units::Metric,
            UnitsArg::Standard => Units::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchKindArg {
    Name,
    Zip,
    Postal,
}

impl From<SearchKindArg> for SearchKind {
    fn from(value: SearchKindArg) -> Self {
        match value {
            SearchKindArg::Name => SearchKind::Name,
            SearchKindArg::Zip => SearchKind::Zip,
            SearchKindArg::Postal => SearchKind::Postal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
}

impl CliError {
    fn user(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            code,
            message: message.into(),
        }
    }

    fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            code,
            message: message.into(),
        }
    }

    fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }
}

/// What a command produced, in both output modes.
struct CommandOutput {
    text: String,
    result: Value,
}

impl Cli {
    fn command_name(&self) -> &'static str {
        match &self.command {
            Commands::Parse { .. } => "feeds.parse",
            Commands::Location { action } => match action {
                LocationCommand::Add { .. } => "location.add",
                LocationCommand::Remove { .. } => "location.remove",
                LocationCommand::List => "location.list",
                LocationCommand::Default { .. } => "location.default",
                LocationCommand::Units { .. } => "location.units",
            },
            Commands::Search { .. } => "location.search",
            Commands::Update { .. } => "feeds.update",
            Commands::Show { .. } => "feeds.show",
            Commands::Icon { .. } => "icons.resolve",
            Commands::IconSets { .. } => "icons.sets",
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let command = cli.command_name();
    let json_output = cli.json;
    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(error) => {
            emit_error(command, json_output, &error);
            std::process::exit(error.exit_code());
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run(cli: Cli) -> Result<String, CliError> {
    let config = RuntimeConfig::from_env();
    let fetcher = HttpFetcher::new()
        .map_err(|error| runtime_error(ERROR_CODE_RUNTIME_PROVIDER_INIT, error.to_string()))?;
    run_with(cli, &config, &fetcher, Utc::now)
}

fn run_with<F, N>(
    cli: Cli,
    config: &RuntimeConfig,
    fetcher: &F,
    now_fn: N,
) -> Result<String, CliError>
where
    F: FeedFetcher,
    N: Fn() -> DateTime<Utc>,
{
    let command = cli.command_name();
    let json_output = cli.json;
    let output = match cli.command {
        Commands::Parse { feed, file, units } => parse_command(feed, file, units.into())?,
        Commands::Location { action } => location_command(config, action)?,
        Commands::Search {
            phrase,
            kind,
            country,
            units,
        } => search_command(config, fetcher, phrase, kind.into(), country, units.into())?,
        Commands::Update { id } => update_command(config, fetcher, now_fn(), id)?,
        Commands::Show { id } => show_command(config, id)?,
        Commands::Icon { code, night } => icon_command(config, code, night)?,
        Commands::IconSets { next } => icon_sets_command(config, next)?,
    };

    if json_output {
        render_json_envelope(command, output.result)
    } else {
        Ok(output.text)
    }
}

fn parse_command(feed: FeedArg, file: PathBuf, units: Units) -> Result<CommandOutput, CliError> {
    let document = fs::read(&file).map_err(|error| {
        user_error(
            ERROR_CODE_USER_INVALID_INPUT,
            format!("cannot read {}: {error}", file.display()),
        )
    })?;

    let source = match feed {
        FeedArg::NwsZip => {
            let coordinates = nws::parse_zip_lookup(&document).map_err(feed_error)?;
            return Ok(CommandOutput {
                text: format!("{},{}", coordinates.latitude, coordinates.longitude),
                result: to_json(&coordinates)?,
            });
        }
        FeedArg::Wu => FeedSource::Wu,
        FeedArg::Nws => FeedSource::Nws,
        FeedArg::Owm => FeedSource::Owm,
    };

    let set = feeds::parse_forecast(source, &document, units).map_err(feed_error)?;
    Ok(CommandOutput {
        text: format_forecast(&field_text(&set.location_name), &set, units),
        result: to_json(&set)?,
    })
}

fn location_command(
    config: &RuntimeConfig,
    action: LocationCommand,
) -> Result<CommandOutput, CliError> {
    let store = StateStore::from_config(config);
    let mut registry = load_registry(&store)?;

    let output = match action {
        LocationCommand::Add {
            name,
            country,
            lat,
            lon,
            units,
            default,
        } => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(user_error(
                    ERROR_CODE_USER_INVALID_INPUT,
                    format!("coordinates out of range: {lat},{lon}"),
                ));
            }
            let location = Location::new(name, country, Coordinates::new(lat, lon), units.into());
            let id = location.id().to_string();
            if registry.contains(&id) {
                return Err(user_error(
                    ERROR_CODE_USER_DUPLICATE_LOCATION,
                    format!("location {id} already exists"),
                ));
            }
            if default {
                registry.add_as_default(location);
            } else {
                registry.add(location);
            }
            describe_location(&registry, &id)?
        }
        LocationCommand::Remove { id } => {
            let removed = registry.remove(&id).ok_or_else(|| unknown_location(&id))?;
            store.remove_forecast(&id).map_err(state_error)?;
            CommandOutput {
                text: format!("removed {}", removed.display_name()),
                result: json!({
                    "removed": id,
                    "default_id": registry.default_id(),
                }),
            }
        }
        LocationCommand::List => {
            let locations = registry.sorted();
            let text = if locations.is_empty() {
                "no locations configured".to_string()
            } else {
                locations
                    .iter()
                    .map(|location| location_line(&registry, location))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            CommandOutput {
                text,
                result: Value::Array(
                    locations
                        .iter()
                        .map(|location| location_json(&registry, location))
                        .collect(),
                ),
            }
        }
        LocationCommand::Default { id } => {
            if !registry.set_default(&id) {
                return Err(unknown_location(&id));
            }
            describe_location(&registry, &id)?
        }
        LocationCommand::Units { id, units } => {
            if !registry.contains(&id) {
                return Err(unknown_location(&id));
            }
            registry.set_units(&id, units.into());
            describe_location(&registry, &id)?
        }
    };

    save_registry(&store, &registry)?;
    Ok(output)
}

fn search_command<F: FeedFetcher>(
    config: &RuntimeConfig,
    fetcher: &F,
    phrase: String,
    kind: SearchKind,
    country: Option<String>,
    units: Units,
) -> Result<CommandOutput, CliError> {
    let key = config.credentials.effective_key().ok_or_else(|| {
        user_error(
            ERROR_CODE_USER_MISSING_API_KEY,
            "an API key is required for location search",
        )
    })?;
    let query = LocationQuery::new(kind, phrase, country);
    let locations = search::search(fetcher, &query, key, units).map_err(feed_error)?;

    let text = locations
        .iter()
        .map(|location| {
            let coordinates = location
                .coordinates()
                .map(|c| format!("{},{}", c.latitude, c.longitude))
                .unwrap_or_default();
            format!("{} {} {coordinates}", location.id(), location.display_name())
        })
        .collect::<Vec<_>>()
        .join("\n");
    let registry = LocationRegistry::new();
    Ok(CommandOutput {
        text,
        result: Value::Array(
            locations
                .iter()
                .map(|location| location_json(&registry, location))
                .collect(),
        ),
    })
}

fn update_command<F: FeedFetcher>(
    config: &RuntimeConfig,
    fetcher: &F,
    now: DateTime<Utc>,
    id: Option<String>,
) -> Result<CommandOutput, CliError> {
    let store = StateStore::from_config(config);
    let registry = load_registry(&store)?;
    if let Some(id) = &id {
        find_location(&registry, id)?;
    }

    let service = WeatherService::new(
        registry,
        fetcher,
        config.credentials.clone(),
        UpdatePolicy::from_config(config),
    );
    let (headline, summary) = match &id {
        Some(id) => {
            let outcome = service.update(id, now);
            (format!("{id}: {}", outcome.as_str()), json!({ "outcome": outcome.as_str() }))
        }
        None => {
            let updated = service.update_all(now);
            let headline = if updated { "updated" } else { "nothing updated" };
            (headline.to_string(), json!({ "updated": updated }))
        }
    };

    let registry = service.into_registry();
    save_registry(&store, &registry)?;

    let ids = match id {
        Some(id) => vec![id],
        None => registry.sorted_ids(),
    };
    let locations: Vec<&Location> = ids.iter().filter_map(|id| registry.get(id)).collect();

    let mut lines = vec![headline];
    lines.extend(locations.iter().map(|location| location_line(&registry, location)));

    let mut result = summary;
    result["locations"] = Value::Array(
        locations
            .iter()
            .map(|location| location_json(&registry, location))
            .collect(),
    );
    Ok(CommandOutput {
        text: lines.join("\n"),
        result,
    })
}

fn show_command(config: &RuntimeConfig, id: Option<String>) -> Result<CommandOutput, CliError> {
    let store = StateStore::from_config(config);
    let registry = load_registry(&store)?;
    let location = match &id {
        Some(id) => find_location(&registry, id)?,
        None => registry.default_location().ok_or_else(|| {
            user_error(ERROR_CODE_USER_UNKNOWN_LOCATION, "no location configured")
        })?,
    };

    let mut text = match &location.forecast {
        Some(set) => format_forecast(&location.display_name(), set, location.units()),
        None => format!("{}: no forecast cached", location.display_name()),
    };
    if let Some(error) = &location.error {
        text.push_str(&format!("\nerror: {error}"));
    }

    Ok(CommandOutput {
        text,
        result: json!({
            "location": location_json(&registry, location),
            "forecast": to_json(&location.forecast)?,
        }),
    })
}

fn icon_command(config: &RuntimeConfig, code: i32, night: bool) -> Result<CommandOutput, CliError> {
    let pack = IconPack::new(config.weather_root.clone(), config.icon_set.clone());
    let phase = if night { Phase::Night } else { Phase::Day };
    let resolved = condition::force_phase(code, phase);
    let path = pack.icon_path(code, phase);

    Ok(CommandOutput {
        text: path.display().to_string(),
        result: json!({
            "code": code,
            "resolved_code": resolved,
            "condition": condition::code_text(resolved),
            "icon_set": pack.set_name(),
            "icon_id": pack.icon_id(code, phase),
            "path": path.display().to_string(),
        }),
    })
}

fn icon_sets_command(config: &RuntimeConfig, next: Option<String>) -> Result<CommandOutput, CliError> {
    let sets = icons::available_sets(&config.weather_root);

    if let Some(current) = next {
        let next = icons::next_set(&sets, &current).ok_or_else(|| {
            user_error(
                ERROR_CODE_USER_NO_ICON_SETS,
                format!(
                    "no icon sets installed under {}",
                    icons::icons_dir(&config.weather_root).display()
                ),
            )
        })?;
        return Ok(CommandOutput {
            text: next.clone(),
            result: json!({ "current": current, "next": next }),
        });
    }

    let text = sets
        .iter()
        .map(|set| {
            let marker = if *set == config.icon_set { "*" } else { " " };
            format!("{marker} {set}")
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(CommandOutput {
        text,
        result: json!({ "active": config.icon_set, "sets": sets }),
    })
}

fn load_registry(store: &StateStore) -> Result<LocationRegistry, CliError> {
    store.load().map_err(state_error)
}

fn save_registry(store: &StateStore, registry: &LocationRegistry) -> Result<(), CliError> {
    store.save(registry).map_err(state_error)
}

fn find_location<'a>(registry: &'a LocationRegistry, id: &str) -> Result<&'a Location, CliError> {
    registry.get(id).ok_or_else(|| unknown_location(id))
}

fn describe_location(registry: &LocationRegistry, id: &str) -> Result<CommandOutput, CliError> {
    let location = find_location(registry, id)?;
    Ok(CommandOutput {
        text: location_line(registry, location),
        result: location_json(registry, location),
    })
}

fn location_json(registry: &LocationRegistry, location: &Location) -> Value {
    let coordinates = location.coordinates();
    json!({
        "id": location.id(),
        "name": location.name,
        "country": location.country,
        "units": location.units().as_str(),
        "latitude": coordinates.map(|c| c.latitude),
        "longitude": coordinates.map(|c| c.longitude),
        "default": registry.default_id() == Some(location.id()),
        "last_checked": location.last_checked,
        "last_updated": location.last_updated,
        "updates_disallowed": location.updates_disallowed,
        "error": location.error,
    })
}

fn location_line(registry: &LocationRegistry, location: &Location) -> String {
    let marker = if registry.default_id() == Some(location.id()) { "*" } else { " " };
    let mut line = format!(
        "{marker} {} {} ({})",
        location.id(),
        location.display_name(),
        location.units()
    );
    if let Some(error) = &location.error {
        line.push_str(&format!(" [{error}]"));
    }
    line
}

fn format_forecast(name: &str, set: &ForecastSet, units: Units) -> String {
    let degree = if units.is_metric() { "°C" } else { "°F" };
    let fetched = set
        .fetched_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let mut lines = vec![
        format!("{name} | source={} | fetched={fetched}", set.source.as_str()),
        format!("now {}", period_summary(&set.current, degree)),
    ];

    for forecast in &set.forecasts {
        let halves: Vec<String> = [&forecast.day, &forecast.night]
            .into_iter()
            .flatten()
            .map(|period| format!("{}: {}", field_text(&period.title), period_summary(period, degree)))
            .collect();
        lines.push(halves.join(" | "));
    }

    for alert in &set.alerts.alerts {
        lines.push(format!("alert: {} until {}", alert.title, alert.expires));
    }
    lines.join("\n")
}

fn period_summary(period: &ForecastPeriod, degree: &str) -> String {
    let condition = period
        .condition
        .value()
        .cloned()
        .unwrap_or_else(|| condition::code_text(period.code).to_string());
    format!(
        "{condition} {}{degree} precip={}% wind={}",
        field_text(&period.temperature),
        field_text(&period.precip_probability),
        field_text(&period.wind_direction)
    )
}

fn field_text<T: Display>(field: &Field<T>) -> String {
    match field {
        Field::Value(value) => value.to_string(),
        Field::NotSupported => "-".to_string(),
        Field::Invalid => NA_TEXT.to_string(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CliError> {
    serde_json::to_value(value).map_err(|error| {
        runtime_error(
            ERROR_CODE_RUNTIME_SERIALIZE,
            format!("failed to serialize output: {error}"),
        )
    })
}

fn render_json_envelope(command: &str, result: Value) -> Result<String, CliError> {
    serde_json::to_string(&json!({
        "schema_version": ENVELOPE_SCHEMA_VERSION,
        "command": command,
        "ok": true,
        "result": result,
    }))
    .map_err(|error| {
        runtime_error(
            ERROR_CODE_RUNTIME_SERIALIZE,
            format!("failed to serialize output envelope: {error}"),
        )
    })
}

fn emit_error(command: &str, json_output: bool, error: &CliError) {
    if !json_output {
        eprintln!("error[{}]: {}", error.code, redact_secrets(&error.message));
        return;
    }

    let payload = json!({
        "schema_version": ENVELOPE_SCHEMA_VERSION,
        "command": command,
        "ok": false,
        "error": {
            "code": error.code,
            "message": redact_secrets(&error.message),
            "details": {
                "kind": error_kind_label(error.kind),
                "exit_code": error.exit_code(),
            }
        }
    });
    match serde_json::to_string(&payload) {
        Ok(rendered) => println!("{rendered}"),
        Err(serialize_error) => eprintln!(
            "error[{ERROR_CODE_RUNTIME_SERIALIZE}]: failed to serialize error envelope: {serialize_error}"
        ),
    }
}

fn user_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError::user(code, message)
}

fn runtime_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError::runtime(code, message)
}

fn unknown_location(id: &str) -> CliError {
    user_error(ERROR_CODE_USER_UNKNOWN_LOCATION, format!("unknown location: {id}"))
}

fn state_error(error: io::Error) -> CliError {
    runtime_error(ERROR_CODE_RUNTIME_STATE, format!("state store: {error}"))
}

fn feed_error(error: FeedError) -> CliError {
    map_app_error(error.into())
}

fn map_app_error(error: AppError) -> CliError {
    match error.kind {
        ErrorKind::User => user_error(ERROR_CODE_USER_INVALID_INPUT, error.message),
        ErrorKind::Runtime => runtime_error(ERROR_CODE_RUNTIME_FEED, error.message),
    }
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::User => "user",
        ErrorKind::Runtime => "runtime",
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;

    use chrono::TimeZone;
    use weather_feeds::config::Credentials;
    use weather_feeds::providers::ProviderError;

    use super::*;

    const ONECALL: &[u8] = include_bytes!("../tests/fixtures/owm_onecall.json");

    #[derive(Default)]
    struct FakeFetcher {
        calls: Cell<usize>,
    }

    impl FeedFetcher for FakeFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            self.calls.set(self.calls.get() + 1);
            Ok(ONECALL.to_vec())
        }
    }

    fn config_in(dir: &Path, user_key: Option<&str>) -> RuntimeConfig {
        RuntimeConfig {
            state_dir: dir.join("state"),
            weather_root: dir.to_path_buf(),
            update_interval_secs: 1800,
            upstream_ttl_secs: 0,
            credentials: Credentials {
                user_key: user_key.map(str::to_string),
                ..Credentials::default()
            },
            icon_set: "Gemstone".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0)
            .single()
            .expect("time")
    }

    fn run_args(
        args: &[&str],
        config: &RuntimeConfig,
        fetcher: &FakeFetcher,
    ) -> Result<String, CliError> {
        let cli = Cli::try_parse_from(std::iter::once("weather-feeds").chain(args.iter().copied()))
            .expect("parse args");
        run_with(cli, config, fetcher, fixed_now)
    }

    fn run_json(args: &[&str], config: &RuntimeConfig, fetcher: &FakeFetcher) -> Value {
        let output = run_args(args, config, fetcher).expect("command succeeds");
        serde_json::from_str(&output).expect("json envelope")
    }

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
    }

    const ADD_KANSAS_CITY: &[&str] = &[
        "location",
        "add",
        "--name",
        "Kansas City",
        "--country",
        "US",
        "--lat=39.1",
        "--lon=-94.58",
        "--json",
    ];

    #[test]
    fn location_add_and_list_use_json_envelope() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), Some("key"));
        let fetcher = FakeFetcher::default();

        let added = run_json(ADD_KANSAS_CITY, &config, &fetcher);
        assert_eq!(added["schema_version"], "v1");
        assert_eq!(added["command"], "location.add");
        assert_eq!(added["ok"], true);
        assert_eq!(added["result"]["id"], "801127616");
        assert_eq!(added["result"]["default"], true);

        let listed = run_json(&["location", "list", "--json"], &config, &fetcher);
        let locations = listed["result"].as_array().expect("array");
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0]["units"], "Standard");
    }

    #[test]
    fn duplicate_location_is_a_user_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), Some("key"));
        let fetcher = FakeFetcher::default();
        run_args(ADD_KANSAS_CITY, &config, &fetcher).expect("first add");

        let error = run_args(ADD_KANSAS_CITY, &config, &fetcher).expect_err("duplicate");
        assert_eq!(error.code, ERROR_CODE_USER_DUPLICATE_LOCATION);
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn update_persists_forecast_for_show() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), Some("key"));
        let fetcher = FakeFetcher::default();
        run_args(ADD_KANSAS_CITY, &config, &fetcher).expect("add");

        let updated = run_json(&["update", "--json"], &config, &fetcher);
        assert_eq!(updated["result"]["updated"], true);
        assert_eq!(fetcher.calls.get(), 1);

        let shown = run_json(&["show", "--json"], &config, &fetcher);
        assert_eq!(shown["result"]["forecast"]["source"], "Owm");
        assert_eq!(
            shown["result"]["forecast"]["forecasts"]
                .as_array()
                .map(Vec::len),
            Some(3)
        );
        assert_eq!(shown["result"]["location"]["error"], Value::Null);

        let again = run_json(&["update", "--json"], &config, &fetcher);
        assert_eq!(again["result"]["updated"], false);
        assert_eq!(fetcher.calls.get(), 1);
    }

    #[test]
    fn update_without_key_records_failure_on_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), None);
        let fetcher = FakeFetcher::default();
        run_args(ADD_KANSAS_CITY, &config, &fetcher).expect("add");

        let updated = run_json(&["update", "801127616", "--json"], &config, &fetcher);
        assert_eq!(updated["result"]["outcome"], "failed");
        assert_eq!(
            updated["result"]["locations"][0]["error"],
            "update failed: configuration error: an API key is required"
        );
        assert_eq!(fetcher.calls.get(), 0);
    }

    #[test]
    fn unknown_location_maps_to_user_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), Some("key"));
        let error = run_args(&["show", "404"], &config, &FakeFetcher::default())
            .expect_err("unknown");
        assert_eq!(error.code, ERROR_CODE_USER_UNKNOWN_LOCATION);
        assert_eq!(error.kind, ErrorKind::User);
    }

    #[test]
    fn parse_prints_normalized_wu_forecast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), None);
        let file = fixture("wu_forecast.xml");
        let output = run_args(
            &["parse", "--feed", "wu", "--file", &file],
            &config,
            &FakeFetcher::default(),
        )
        .expect("parse");
        assert!(output.starts_with("Kansas City, MO | source=WU"));
    }

    #[test]
    fn parse_nws_zip_prints_coordinates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), None);
        let file = fixture("nws_zip.xml");
        let output = run_args(
            &["parse", "--feed", "nws-zip", "--file", &file],
            &config,
            &FakeFetcher::default(),
        )
        .expect("parse");
        assert_eq!(output, "39.0997,-94.5786");
    }

    #[test]
    fn search_requires_a_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), None);
        let error = run_args(&["search", "Springfield"], &config, &FakeFetcher::default())
            .expect_err("missing key");
        assert_eq!(error.code, ERROR_CODE_USER_MISSING_API_KEY);
    }

    #[test]
    fn icon_resolves_night_variant() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path(), None);
        let output = run_json(&["icon", "32", "--night", "--json"], &config, &FakeFetcher::default());
        assert_eq!(output["result"]["resolved_code"], 31);
        assert!(
            output["result"]["path"]
                .as_str()
                .is_some_and(|path| path.ends_with("Icons/Gemstone/31.png"))
        );
    }

    #[test]
    fn error_envelope_masks_credentials() {
        let error = runtime_error(
            ERROR_CODE_RUNTIME_FEED,
            "GET onecall?lat=1&appid=secret123&units=metric",
        );
        assert_eq!(
            redact_secrets(&error.message),
            "GET onecall?lat=1&appid=***&units=metric"
        );
        assert_eq!(redact_secrets("no secrets here"), "no secrets here");
    }

    #[test]
    fn help_flag_is_supported() {
        let error = Cli::try_parse_from(["weather-feeds", "--help"]).expect_err("help exits");
        assert_eq!(error.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
