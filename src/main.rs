//! Command-line entry point.
//!
//! Builds the whole pipeline from environment configuration and exposes a
//! few operational commands: a one-off flight status lookup, quote
//! generation and the monitoring daemon. Collaborating services embed the
//! same components through the library crate.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{App, Arg};
use log::info;
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use aerocover::aggregator::cache::Cache;
use aerocover::aggregator::data_router::DataRouter;
use aerocover::aggregator::executor::{RetryExecutor, RetryPolicy};
use aerocover::aggregator::flight::FlightAggregator;
use aerocover::aggregator::router::SourceRouter;
use aerocover::aggregator::weather::WeatherAggregator;
use aerocover::chain::client::{ChainClient, HttpChainTransport, SignerKey};
use aerocover::chain::escrow::EscrowAdapter;
use aerocover::config::{self, CoreConfig};
use aerocover::model::CoverageType;
use aerocover::monitor::lifecycle::PolicyMonitor;
use aerocover::monitor::scheduler::Scheduler;
use aerocover::quote::engine::{QuoteEngine, QuoteRequest};
use aerocover::sources::aviationstack::AviationStackSource;
use aerocover::sources::flightaware::FlightAwareSource;
use aerocover::sources::opensky::OpenSkySource;
use aerocover::sources::openweather::OpenWeatherSource;
use aerocover::sources::weatherapi::WeatherApiSource;
use aerocover::sources::{FlightQuery, FlightSource, WeatherSource};
use aerocover::store::memory::MemoryStore;

/// Everything the commands need, wired once.
struct Core {
    engine: QuoteEngine,
    flights: Arc<FlightAggregator>,
    monitor: Arc<PolicyMonitor>,
    scheduler: Scheduler,
}

fn build_flight_sources() -> Vec<Arc<dyn FlightSource>> {
    let mut sources: Vec<Arc<dyn FlightSource>> = Vec::new();

    match env::var(config::ENV_AVIATIONSTACK_KEY) {
        Ok(key) if !key.is_empty() => match AviationStackSource::new(key) {
            Ok(source) => sources.push(Arc::new(source)),
            Err(e) => eprintln!("skipping aviationstack: {}", e),
        },
        _ => eprintln!("{} not set, skipping aviationstack", config::ENV_AVIATIONSTACK_KEY),
    }
    match env::var(config::ENV_FLIGHTAWARE_KEY) {
        Ok(key) if !key.is_empty() => match FlightAwareSource::new(key) {
            Ok(source) => sources.push(Arc::new(source)),
            Err(e) => eprintln!("skipping flightaware: {}", e),
        },
        _ => eprintln!("{} not set, skipping flightaware", config::ENV_FLIGHTAWARE_KEY),
    }
    if let (Ok(user), Ok(pass)) = (
        env::var(config::ENV_OPENSKY_USER),
        env::var(config::ENV_OPENSKY_PASS),
    ) {
        if !user.is_empty() {
            match OpenSkySource::new(user, pass) {
                Ok(source) => sources.push(Arc::new(source)),
                Err(e) => eprintln!("skipping opensky: {}", e),
            }
        }
    }

    sources
}

fn build_weather_sources() -> Vec<Arc<dyn WeatherSource>> {
    let mut sources: Vec<Arc<dyn WeatherSource>> = Vec::new();

    if let Ok(key) = env::var(config::ENV_OPENWEATHER_KEY) {
        if !key.is_empty() {
            match OpenWeatherSource::new(key) {
                Ok(source) => sources.push(Arc::new(source)),
                Err(e) => eprintln!("skipping openweathermap: {}", e),
            }
        }
    }
    if let Ok(key) = env::var(config::ENV_WEATHERAPI_KEY) {
        if !key.is_empty() {
            match WeatherApiSource::new(key) {
                Ok(source) => sources.push(Arc::new(source)),
                Err(e) => eprintln!("skipping weatherapi: {}", e),
            }
        }
    }

    sources
}

async fn build_core(cfg: CoreConfig) -> Result<Core> {
    let flight_sources = build_flight_sources();
    if flight_sources.is_empty() {
        return Err(anyhow!(
            "no flight sources configured; set at least one provider API key"
        ));
    }
    let weather_sources = build_weather_sources();

    let retry = RetryExecutor::new(RetryPolicy::from_config(&cfg));

    let flights = Arc::new(FlightAggregator::new(
        Arc::new(SourceRouter::new(flight_sources, cfg.health_ttl)),
        Arc::new(Cache::new()),
        retry.clone(),
        cfg.flight_cache_ttl,
    ));
    let weather = Arc::new(WeatherAggregator::new(
        Arc::new(SourceRouter::new(weather_sources, cfg.health_ttl)),
        Arc::new(Cache::new()),
        retry.clone(),
        cfg.weather_cache_ttl,
    ));
    let data_router = Arc::new(DataRouter::new(flights.clone(), weather.clone()));

    let store = Arc::new(MemoryStore::new());

    let transport = HttpChainTransport::new(cfg.chain_rpc_url.clone())
        .context("building chain transport")?;
    let chain = Arc::new(ChainClient::new(Box::new(transport), cfg.unit_scale));
    match env::var(config::ENV_CHAIN_SIGNER_KEY) {
        Ok(encoded) if !encoded.is_empty() => {
            let key = SignerKey::from_base64(&encoded).context("decoding chain signer key")?;
            chain.set_signer_key(key).await;
        }
        _ => {
            let key = SignerKey::generate();
            info!("no signer key configured; generated {}", key.address());
            chain.set_signer_key(key).await;
        }
    }
    let escrow = Arc::new(EscrowAdapter::new(
        chain,
        store.clone(),
        cfg.hash_synthesis_enabled,
        cfg.unit_scale,
    ));

    let engine = QuoteEngine::new(data_router, store.clone(), cfg.clone());
    let monitor = Arc::new(PolicyMonitor::new(
        store.clone(),
        flights.clone(),
        escrow,
        retry,
        cfg,
    ));
    let scheduler = Scheduler::new(store);

    Ok(Core {
        engine,
        flights,
        monitor,
        scheduler,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let matches = App::new("aerocover")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Parametric flight-delay insurance core")
        .arg(
            Arg::with_name("flight-status")
                .long("flight-status")
                .takes_value(true)
                .value_name("FLIGHT")
                .help("Look up the canonical status of a flight, e.g. BT318."),
        )
        .arg(
            Arg::with_name("quote")
                .long("quote")
                .takes_value(true)
                .value_name("FLIGHT")
                .help("Generate a quote for a flight."),
        )
        .arg(
            Arg::with_name("date")
                .long("date")
                .takes_value(true)
                .value_name("YYYY-MM-DD")
                .help("Departure date for --flight-status / --quote."),
        )
        .arg(
            Arg::with_name("coverage")
                .long("coverage")
                .takes_value(true)
                .default_value("500.00")
                .help("Coverage amount in currency units for --quote."),
        )
        .arg(
            Arg::with_name("coverage-type")
                .long("coverage-type")
                .takes_value(true)
                .possible_values(&["delay", "cancellation", "weather"])
                .default_value("delay")
                .help("Product to quote."),
        )
        .arg(
            Arg::with_name("airports")
                .long("airports")
                .takes_value(true)
                .value_name("IATA,IATA")
                .help("Airports whose weather feeds into the quote."),
        )
        .arg(
            Arg::with_name("monitor")
                .long("monitor")
                .help("Run the policy monitoring sweep until interrupted."),
        )
        .arg(
            Arg::with_name("monitor-interval")
                .long("monitor-interval")
                .takes_value(true)
                .default_value("60")
                .help("Seconds between monitoring sweeps."),
        )
        .get_matches();

    let cfg = CoreConfig::from_env();
    let core = build_core(cfg).await?;
    let cancel = CancellationToken::new();

    if let Some(flight_number) = matches.value_of("flight-status") {
        let date = parse_date(matches.value_of("date"))?;
        let query = FlightQuery::new(flight_number, date);
        let result = core.flights.get_flight_status(&query, &cancel).await?;
        println!(
            "{} on {}: {} (quality {:.2}, sources: {}, cached: {})",
            flight_number,
            date,
            result.data.status,
            result.quality_score,
            result.sources_used.join(", "),
            result.from_cache
        );
        if let Some(delay) = result.data.arrival_delay_minutes {
            println!("arrival delay: {} minutes", delay);
        }
        return Ok(());
    }

    if let Some(flight_number) = matches.value_of("quote") {
        let date = parse_date(matches.value_of("date"))?;
        let coverage = matches.value_of("coverage").unwrap_or("500.00");
        let coverage_cents = aerocover::chain::amount::to_units(coverage, 100);
        if coverage_cents == 0 {
            return Err(anyhow!("coverage amount '{}' is not a positive decimal", coverage));
        }
        let coverage_type = match matches.value_of("coverage-type") {
            Some("cancellation") => CoverageType::FlightCancellation,
            Some("weather") => CoverageType::WeatherDisruption,
            _ => CoverageType::FlightDelay,
        };
        let airports: Vec<String> = matches
            .value_of("airports")
            .map(|list| list.split(',').map(|a| a.trim().to_uppercase()).collect())
            .unwrap_or_default();

        let response = core
            .engine
            .generate_quote(
                &QuoteRequest {
                    flight_number: flight_number.to_string(),
                    flight_date: date,
                    coverage_type,
                    coverage_amount_cents: coverage_cents,
                    airports,
                },
                &cancel,
            )
            .await?;
        let quote = &response.quotes[0];
        println!("quote {} ({})", quote.quote_number, response.quote_id);
        println!(
            "  premium: {} for {} coverage",
            aerocover::chain::amount::from_units(quote.premium_cents, 100),
            aerocover::chain::amount::from_units(quote.coverage_amount_cents, 100),
        );
        println!("  valid until: {}", response.valid_until.to_rfc3339());
        return Ok(());
    }

    if matches.is_present("monitor") {
        let interval: u64 = matches
            .value_of("monitor-interval")
            .unwrap_or("60")
            .parse()
            .context("parsing --monitor-interval")?;
        core.monitor
            .start_monitoring(&core.scheduler, interval)
            .await?;
        println!("monitoring sweep every {}s; ctrl-c to stop", interval);
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        core.scheduler.shutdown();
        return Ok(());
    }

    println!("nothing to do; try --flight-status, --quote or --monitor");
    Ok(())
}

fn parse_date(value: Option<&str>) -> Result<NaiveDate> {
    match value {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("parsing date '{}'", s)),
        None => Ok(chrono::Utc::now().date_naive()),
    }
}
