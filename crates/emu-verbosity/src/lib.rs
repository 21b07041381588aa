//! Emulator verbosity levels.
//!
//! The foreign emulator understands a closed set of six log detail levels and
//! receives them as the integers 0 through 5. Both the emulator constructor and
//! the get-method parameter blob use the same mapping.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Verbosity {
    #[default]
    Short,
    Full,
    FullLocation,
    FullLocationGas,
    FullLocationStack,
    FullLocationStackVerbose,
}

const ALL: [Verbosity; 6] = [
    Verbosity::Short,
    Verbosity::Full,
    Verbosity::FullLocation,
    Verbosity::FullLocationGas,
    Verbosity::FullLocationStack,
    Verbosity::FullLocationStackVerbose,
];

impl Verbosity {
    pub fn all() -> &'static [Verbosity] {
        &ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verbosity::Short => "short",
            Verbosity::Full => "full",
            Verbosity::FullLocation => "full_location",
            Verbosity::FullLocationGas => "full_location_gas",
            Verbosity::FullLocationStack => "full_location_stack",
            Verbosity::FullLocationStackVerbose => "full_location_stack_verbose",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "short" => Some(Verbosity::Short),
            "full" => Some(Verbosity::Full),
            "full_location" => Some(Verbosity::FullLocation),
            "full_location_gas" => Some(Verbosity::FullLocationGas),
            "full_location_stack" => Some(Verbosity::FullLocationStack),
            "full_location_stack_verbose" => Some(Verbosity::FullLocationStackVerbose),
            _ => None,
        }
    }

    /// Integer level passed across the foreign boundary.
    pub fn level(self) -> u8 {
        match self {
            Verbosity::Short => 0,
            Verbosity::Full => 1,
            Verbosity::FullLocation => 2,
            Verbosity::FullLocationGas => 3,
            Verbosity::FullLocationStack => 4,
            Verbosity::FullLocationStackVerbose => 5,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        ALL.get(usize::from(level)).copied()
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct VerbosityParseError {
    value: String,
}

impl fmt::Display for VerbosityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid verbosity {:?} (expected one of: short, full, full_location, full_location_gas, full_location_stack, full_location_stack_verbose)",
            self.value
        )
    }
}

impl std::error::Error for VerbosityParseError {}

impl FromStr for Verbosity {
    type Err = VerbosityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Verbosity::parse(&s).ok_or(VerbosityParseError { value: s })
    }
}

impl Serialize for Verbosity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.level())
    }
}

#[cfg(feature = "clap")]
impl clap::ValueEnum for Verbosity {
    fn value_variants<'a>() -> &'a [Self] {
        &ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}
