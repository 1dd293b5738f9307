use std::cmp::Ordering;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("could not split apart version {value:?}: expected 4 or 5 components, found {found}")]
    ComponentCount { value: String, found: usize },

    #[error("version component {component:?} is not an integer: {source}")]
    InvalidComponent {
        component: String,
        #[source]
        source: ParseIntError,
    },
}

/// A media server version, e.g. `0.9.8.4.125-ffe2a5d` or `1.2.3.4.dev`.
///
/// Layout is `MAJOR.MINOR.MICRO[.PATCH].BUILD[-GITREV]`. A build of `dev`
/// marks a development build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub patch: u32,
    pub build: u32,
    pub is_dev: bool,
    pub gitrev: String,
}

fn component(value: &str) -> Result<u32, VersionError> {
    value.parse::<u32>().map_err(|source| VersionError::InvalidComponent {
        component: value.to_string(),
        source,
    })
}

impl FromStr for ServerVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dash_split: Vec<&str> = s.split('-').collect();
        let (numbers, gitrev) = match dash_split.as_slice() {
            [numbers, gitrev] => (*numbers, gitrev.to_string()),
            _ => (s, String::new()),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(VersionError::ComponentCount {
                value: numbers.to_string(),
                found: parts.len(),
            });
        }

        let mut version = ServerVersion {
            major: component(parts[0])?,
            minor: component(parts[1])?,
            micro: component(parts[2])?,
            gitrev,
            ..Default::default()
        };

        let build = if parts.len() == 5 {
            version.patch = component(parts[3])?;
            parts[4]
        } else {
            parts[3]
        };

        if build == "dev" {
            version.is_dev = true;
        } else {
            version.build = component(build)?;
        }

        Ok(version)
    }
}

impl ServerVersion {
    fn key(&self) -> (u32, u32, u32, u32, u32) {
        (self.major, self.minor, self.micro, self.patch, self.build)
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key()
            .cmp(&other.key())
            .then_with(|| self.is_dev.cmp(&other.is_dev))
            .then_with(|| self.gitrev.cmp(&other.gitrev))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}.", self.major, self.minor, self.micro, self.patch)?;
        if self.is_dev {
            write!(f, "dev")?;
        } else {
            write!(f, "{}", self.build)?;
        }
        if !self.gitrev.is_empty() {
            write!(f, "-{}", self.gitrev)?;
        }
        Ok(())
    }
}
