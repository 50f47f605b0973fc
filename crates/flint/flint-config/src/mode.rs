use crate::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Which queue a demo process talks over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// One producer, one consumer, no loss.
    Spsc,
    /// One writer, any number of readers; slow readers drop messages.
    Spmc,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spsc" => Ok(Mode::Spsc),
            "spmc" => Ok(Mode::Spmc),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Spsc => "spsc",
            Mode::Spmc => "spmc",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_modes() {
        assert_eq!("spsc".parse::<Mode>().unwrap(), Mode::Spsc);
        assert_eq!("SPMC".parse::<Mode>().unwrap(), Mode::Spmc);
        assert_eq!(Mode::Spmc.to_string(), "spmc");
    }

    #[test]
    fn rejects_other_modes() {
        let err = "mpmc".parse::<Mode>().unwrap_err();
        assert!(err.to_string().contains("mpmc"));
    }
}
