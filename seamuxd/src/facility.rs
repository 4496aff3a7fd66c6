//! Syslog facility names
//!
//! Maps the facility names accepted by `-l` and the `logto` config key
//! to their syslog facility numbers. The table follows the documented
//! syslog assignments; the encoded priority value is `facility << 3`.

use std::fmt;
use std::str::FromStr;

/// A syslog facility, stored as its facility number (0–23).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facility(u8);

/// (name, facility number) in documented order.
const FACILITIES: &[(&str, u8)] = &[
    ("kern", 0),
    ("user", 1),
    ("mail", 2),
    ("daemon", 3),
    ("auth", 4),
    ("syslog", 5),
    ("lpr", 6),
    ("news", 7),
    ("uucp", 8),
    ("cron", 9),
    ("authpriv", 10),
    ("ftp", 11),
    ("local0", 16),
    ("local1", 17),
    ("local2", 18),
    ("local3", 19),
    ("local4", 20),
    ("local5", 21),
    ("local6", 22),
    ("local7", 23),
];

impl Facility {
    /// The default facility for a daemon.
    pub const DAEMON: Facility = Facility(3);

    /// Facility number (0–23).
    pub fn number(self) -> u8 {
        self.0
    }

    /// The facility part of a syslog priority value.
    pub fn code(self) -> u8 {
        self.0 << 3
    }

    /// The configuration name of this facility.
    pub fn name(self) -> &'static str {
        FACILITIES
            .iter()
            .find(|(_, n)| *n == self.0)
            .map(|(name, _)| *name)
            .unwrap_or("daemon")
    }
}

impl FromStr for Facility {
    type Err = ();

    /// Parse a facility name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FACILITIES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, n)| Facility(*n))
            .ok_or(())
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_names() {
        assert_eq!("daemon".parse::<Facility>(), Ok(Facility::DAEMON));
        assert_eq!("kern".parse::<Facility>().unwrap().number(), 0);
        assert_eq!("ftp".parse::<Facility>().unwrap().number(), 11);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("DAEMON".parse::<Facility>(), Ok(Facility::DAEMON));
        assert_eq!("Local3".parse::<Facility>().unwrap().number(), 19);
    }

    #[test]
    fn local_facilities_map_to_16_through_23() {
        for i in 0..8u8 {
            let fac = format!("local{i}").parse::<Facility>().unwrap();
            assert_eq!(fac.number(), 16 + i);
            assert_eq!(fac.code(), (16 + i) << 3);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("local8".parse::<Facility>().is_err());
        assert!("printer".parse::<Facility>().is_err());
        assert!("".parse::<Facility>().is_err());
    }

    #[test]
    fn name_round_trips() {
        for (name, _) in super::FACILITIES {
            let fac = name.parse::<Facility>().unwrap();
            assert_eq!(fac.name(), *name);
        }
    }
}
