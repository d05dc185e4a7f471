use anyhow::{Context, bail};
use chrono::Timelike;
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password};
use std::sync::Arc;
use tracing::debug;
use yaweather_core::{
    AddCityError, CityError, CityList, CityListOptions, Config, Day, JsonFileStore,
    NominatimResolver, WeatherProvider, WeatherSnapshot, provider::yandex::YandexWeatherProvider,
    provider_from_config,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "yaweather", version, about = "Weather for your tracked cities")]
pub struct Cli {
    /// More log output (-v, -vv). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the weather provider API key.
    Configure,

    /// List tracked cities with their last known weather.
    List,

    /// Fetch fresh weather for every tracked city.
    Refresh,

    /// Start tracking a city.
    Add {
        city: String,
    },

    /// Stop tracking a city.
    Remove {
        city: String,
    },

    /// Swap two cities in the list (1-based positions).
    Swap {
        first: usize,
        second: usize,
    },

    /// Move a city to another position (1-based).
    Move {
        from: usize,
        to: usize,
    },

    /// Show current conditions and the hourly forecast for a city.
    Show {
        city: String,

        /// Show tomorrow's hours instead of today's.
        #[arg(long)]
        tomorrow: bool,
    },

    /// List tracked cities whose name contains the query.
    Search {
        query: String,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load()?;

        match self.command {
            Command::Configure => configure(config)?,
            Command::List => {
                let list = open_list(&config, false)?;
                print_table(&list.snapshots().await);
            }
            Command::Refresh => {
                let list = open_list(&config, true)?;
                let names = list.names().await;
                let summary = list
                    .refresh(&names, |index, result| match result {
                        Ok(w) => println!("✓ {} {}°C", display_name(&w.name), w.temperature_label()),
                        Err(e) => println!("✗ {}: {e}", display_name(&names[index])),
                    })
                    .await;
                println!();
                print_table(&list.snapshots().await);
                print_banner(&list);
                debug!(?summary, "refresh done");
            }
            Command::Add { city } => add_city(&config, &city).await?,
            Command::Remove { city } => {
                let list = open_list(&config, false)?;
                if list.delete_city(&city).await? {
                    println!("Removed {}", display_name(&city));
                } else {
                    println!("{} is not tracked", display_name(&city));
                }
            }
            Command::Swap { first, second } => {
                let list = open_list(&config, false)?;
                list.swap_cities(position(first)?, position(second)?).await?;
                print_table(&list.snapshots().await);
            }
            Command::Move { from, to } => {
                let list = open_list(&config, false)?;
                list.move_city(position(from)?, position(to)?).await?;
                print_table(&list.snapshots().await);
            }
            Command::Show { city, tomorrow } => {
                let list = open_list(&config, false)?;
                let Some(weather) = list.snapshot(&city).await else {
                    bail!("{} is not tracked. Hint: run `yaweather add \"{city}\"`.", display_name(&city));
                };
                let day = if tomorrow { Day::Tomorrow } else { Day::Today };
                print_details(&weather, day);
            }
            Command::Search { query } => {
                let list = open_list(&config, false)?;
                print_table(&list.search(&query).await);
            }
        }

        Ok(())
    }
}

fn configure(mut config: Config) -> anyhow::Result<()> {
    let api_key = Password::new("Weather API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    config.set_api_key(api_key.trim().to_string());
    config.save()?;
    println!("Saved to {}", Config::config_file_path()?.display());
    Ok(())
}

/// Build the city list. Commands that only touch the store do not need an API key.
fn open_list(config: &Config, needs_network: bool) -> anyhow::Result<CityList> {
    let provider: Arc<dyn WeatherProvider> = if needs_network {
        Arc::from(provider_from_config(config)?)
    } else {
        Arc::new(YandexWeatherProvider::new(
            config.api_key().unwrap_or_default(),
            &config.weather,
        )?)
    };
    let resolver = Arc::new(NominatimResolver::new(&config.geocoder)?);
    let store = Arc::new(JsonFileStore::new(config.storage_file_path()?));

    let list = CityList::open(resolver, provider, store, CityListOptions::from_config(config))
        .context("Failed to open the city list")?;

    for record in list.quarantined() {
        eprintln!(
            "warning: unreadable record #{} in {} is kept aside in the data file: {}",
            record.position, record.key, record.error
        );
    }

    Ok(list)
}

async fn add_city(config: &Config, city: &str) -> anyhow::Result<()> {
    let list = open_list(config, true)?;

    loop {
        match list.add_city(city).await {
            Ok(added) => {
                match added.weather {
                    Ok(w) => print_details(&w, Day::Today),
                    Err(e) => {
                        println!("Added {}, but the forecast is unavailable: {e}", display_name(city));
                        println!("{}", e.user_message());
                    }
                }
                print_banner(&list);
                return Ok(());
            }
            Err(AddCityError::Geocode(e)) => {
                println!("{}", CityError::from(e).user_message());
                let retry = Confirm::new("Try again?")
                    .with_default(false)
                    .prompt()
                    .context("Failed to read answer")?;
                if !retry {
                    return Ok(());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Convert a 1-based position from the command line.
fn position(n: usize) -> anyhow::Result<usize> {
    n.checked_sub(1).context("Positions start at 1")
}

/// Capitalize the stored lower-case name for display.
fn display_name(name: &str) -> String {
    let name = name.trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn print_table(cities: &[WeatherSnapshot]) {
    if cities.is_empty() {
        println!("No cities tracked.");
        return;
    }
    for (i, w) in cities.iter().enumerate() {
        println!(
            "{:>2}. {:<20} {:>4}°C  {}",
            i + 1,
            display_name(&w.name),
            w.temperature_label(),
            w.condition.description(),
        );
    }
}

fn print_details(w: &WeatherSnapshot, day: Day) {
    println!("{}", display_name(&w.name));
    println!("  {}°C, {}", w.temperature_label(), w.condition.description());
    println!("  Давление: {} мм рт. ст.", w.pressure);
    println!("  Ветер: {} м/с", w.wind_speed);
    if let Some(icon) = w.icon_url() {
        println!("  {icon}");
    }
    if !w.url.is_empty() {
        println!("  {}", w.url);
    }

    let Some(forecast) = w.forecast(day) else {
        println!("  No hourly forecast available.");
        return;
    };
    if let Some(date) = &forecast.date {
        println!("  {date}");
    }
    let now = (day == Day::Today).then(|| chrono::Local::now().hour());
    for reading in &forecast.hours {
        let marker = if now.is_some() && reading.hour_of_day() == now { ">" } else { " " };
        println!("  {marker} {}  {}ºC", reading.label(), reading.temp);
    }
}

fn print_banner(list: &CityList) {
    if list.is_offline() {
        println!("YaWeather offline: showing last saved data.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_capitalizes_cyrillic() {
        assert_eq!(display_name("москва"), "Москва");
        assert_eq!(display_name(" санкт-петербург "), "Санкт-петербург");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn positions_are_one_based() {
        assert_eq!(position(1).unwrap(), 0);
        assert!(position(0).is_err());
    }

    #[test]
    fn parses_show_with_tomorrow() {
        let cli = Cli::try_parse_from(["yaweather", "-v", "show", "Томск", "--tomorrow"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Command::Show { ref city, tomorrow: true } if city == "Томск"
        ));
    }
}
