use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

pub const DEFAULT_QOS_PROFILE: &str = "example_Library::example_Profile";

/// Reference to a named QoS profile (`<library>::<profile>`).
///
/// The engine carries the name through to every entity created with it and
/// never interprets the policies behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QosProfile {
    name: String,
}

impl QosProfile {
    pub fn parse(name: &str) -> Result<Self> {
        match name.split_once("::") {
            Some((library, profile))
                if !library.is_empty() && !profile.is_empty() && !profile.contains("::") =>
            {
                Ok(Self {
                    name: name.to_string(),
                })
            }
            _ => Err(Error::Config(format!(
                "qos profile `{name}` is not of the form <library>::<profile>"
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        self.name.split_once("::").map_or("", |(library, _)| library)
    }
}

impl Default for QosProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_QOS_PROFILE.to_string(),
        }
    }
}

impl FromStr for QosProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for QosProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
