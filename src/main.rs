use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    // RUST_LOG=rmutex=trace, with the `trace` feature on
    env_logger::init();

    args()
        .nth(1)
        .ok_or(format!(
            "no scenario supplied, use one of {} or see unit tests",
            Scenario::iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| {
            Scenario::from_str(&selector)
                .map(|scenario| {
                    log::info!("running {scenario}");
                    match scenario {
                        Scenario::Nesting => rmutex::scenarios::nesting(),
                        Scenario::Contention => rmutex::scenarios::contention(),
                        Scenario::Handoff => rmutex::scenarios::handoff(),
                        Scenario::Guard => rmutex::scenarios::guard(),
                    }
                })
                .map_err(|e| e.to_string())
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    Nesting,
    Contention,
    Handoff,
    Guard,
}
