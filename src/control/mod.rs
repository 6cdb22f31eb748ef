//! Line-oriented control commands for the CLI surface.
//!
//! [`parse_command`] turns one line of input into a [`Command`]; the binary
//! dispatches it against the orchestrator and [`SharedState`].  Text
//! arguments keep their inner whitespace and are validated by the state
//! setters; an empty argument clears the override.
//!
//! ```
//! use wanderfm::control::{parse_command, Command};
//!
//! assert_eq!(parse_command("bpm 120").unwrap(), Command::Bpm(120));
//! assert_eq!(
//!     parse_command("place Hyde Park | park").unwrap(),
//!     Command::Place { name: "Hyde Park".into(), category: Some("park".into()) },
//! );
//! ```
//!
//! [`SharedState`]: crate::pipeline::SharedState

use thiserror::Error;

use crate::pipeline::{SharedState, ValidationError};

/// Shown by `help` and after an unknown command.
pub const HELP: &str = "\
commands:
  start | stop | status | quit
  bpm <60-180>
  genre <text>            (empty clears)
  experience <text>       (empty clears)
  weather <condition> [description]
  city <name>             (looks up current weather)
  locate <lat> <lon>      (looks up weather and the nearest place)
  place <name> [| category]
  hints a, b, c           (empty clears)";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Help,
    Quit,
    Bpm(i32),
    Genre(String),
    Experience(String),
    Weather {
        condition: String,
        description: Option<String>,
    },
    City(String),
    Locate {
        latitude: f64,
        longitude: f64,
    },
    Place {
        name: String,
        category: Option<String>,
    },
    Hints(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}; type `help`")]
    Unknown(String),

    #[error("`{command}` needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("{0:?} is not a whole number")]
    NotANumber(String),

    #[error("{0:?} is not a latitude/longitude pair")]
    NotACoordinate(String),
}

/// Parse one input line.  Keywords are case-insensitive.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };

    let command = match keyword.to_ascii_lowercase().as_str() {
        "start" | "play" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "bpm" => {
            let arg = required(rest, "bpm", "a tempo")?;
            Command::Bpm(arg.parse().map_err(|_| ParseError::NotANumber(arg.to_string()))?)
        }
        "genre" => Command::Genre(rest.to_string()),
        "experience" | "mood" => Command::Experience(rest.to_string()),
        "weather" => {
            let arg = required(rest, "weather", "a condition")?;
            let (condition, description) = match arg.split_once(char::is_whitespace) {
                Some((condition, description)) => {
                    (condition, Some(description.trim().to_string()))
                }
                None => (arg, None),
            };
            Command::Weather {
                condition: condition.to_string(),
                description,
            }
        }
        "city" => Command::City(required(rest, "city", "a city name")?.to_string()),
        "locate" | "gps" => {
            let arg = required(rest, "locate", "a latitude and longitude")?;
            let (latitude, longitude) = coordinates(arg)?;
            Command::Locate {
                latitude,
                longitude,
            }
        }
        "place" => {
            let (name, category) = match rest.split_once('|') {
                Some((name, category)) => {
                    let category = category.trim();
                    (name.trim(), (!category.is_empty()).then(|| category.to_string()))
                }
                None => (rest, None),
            };
            Command::Place {
                name: name.to_string(),
                category,
            }
        }
        "hints" => Command::Hints(
            rest.split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => return Err(ParseError::Unknown(keyword.to_string())),
    };
    Ok(command)
}

fn required<'a>(
    rest: &'a str,
    command: &'static str,
    argument: &'static str,
) -> Result<&'a str, ParseError> {
    if rest.is_empty() {
        Err(ParseError::MissingArgument { command, argument })
    } else {
        Ok(rest)
    }
}

/// `"51.5 -0.12"` or `"51.5, -0.12"`, in range.
fn coordinates(arg: &str) -> Result<(f64, f64), ParseError> {
    let invalid = || ParseError::NotACoordinate(arg.to_string());
    let mut parts = arg
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());
    let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let latitude: f64 = lat.parse().map_err(|_| invalid())?;
    let longitude: f64 = lon.parse().map_err(|_| invalid())?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid());
    }
    Ok((latitude, longitude))
}

impl Command {
    /// Apply a control-input command to `state`.
    ///
    /// Returns `Ok(false)` for commands that are not plain state writes
    /// (lifecycle, status, lookups); the caller handles those.
    pub fn apply_to(&self, state: &SharedState) -> Result<bool, ValidationError> {
        match self {
            Command::Bpm(bpm) => {
                let applied = state.set_bpm(*bpm);
                if applied as i32 != *bpm {
                    log::info!("control: bpm {bpm} clamped to {applied}");
                }
            }
            Command::Genre(genre) => state.set_genre(genre)?,
            Command::Experience(experience) => state.set_experience(experience)?,
            Command::Weather {
                condition,
                description,
            } => state.set_weather(condition, description.as_deref(), None)?,
            Command::Place { name, category } => state.set_place(name, category.as_deref())?,
            Command::Hints(hints) => state.set_style_hints(hints.as_slice())?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
