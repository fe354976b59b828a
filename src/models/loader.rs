use derive_more::Display;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Serialize, Deserialize, Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LoaderType {
    #[default]
    Any,
    Fabric,
    Forge,
    Quilt,
    Rift,
}

impl LoaderType {
    pub fn parse(name: &str) -> Option<LoaderType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "any" => Some(LoaderType::Any),
            "fabric" => Some(LoaderType::Fabric),
            "forge" => Some(LoaderType::Forge),
            "quilt" => Some(LoaderType::Quilt),
            "rift" => Some(LoaderType::Rift),
            _ => None,
        }
    }

    pub fn matches(self, other: LoaderType) -> bool {
        self == LoaderType::Any || other == LoaderType::Any || self == other
    }
}

/// How strictly two game versions have to agree to count as compatible.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionMatch {
    /// `1.19.2` only matches `1.19.2`.
    #[default]
    Minor,
    /// `1.19.2` matches anything on the `1.19` line.
    Major,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GameVersion {
    #[default]
    Any,
    Release(Version),
    /// Snapshots and anything else that does not look like `x.y[.z]`.
    Other(String),
}

fn release_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?$").ok())
        .as_ref()
}

impl GameVersion {
    pub fn parse(raw: &str) -> GameVersion {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("any") {
            return GameVersion::Any;
        }

        let Some(caps) = release_pattern().and_then(|re| re.captures(raw)) else {
            return GameVersion::Other(raw.to_string());
        };

        let part = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        GameVersion::Release(Version::new(part(1), part(2), part(3)))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, GameVersion::Any)
    }

    /// The `major.minor` release line, e.g. `1.19` for `1.19.2`.
    pub fn release_line(&self) -> Option<(u64, u64)> {
        match self {
            GameVersion::Release(v) => Some((v.major, v.minor)),
            _ => None,
        }
    }

    pub fn matches(&self, other: &GameVersion, policy: VersionMatch) -> bool {
        match (self, other) {
            (GameVersion::Any, _) | (_, GameVersion::Any) => true,
            (GameVersion::Release(a), GameVersion::Release(b)) => match policy {
                VersionMatch::Minor => a == b,
                VersionMatch::Major => self.release_line() == other.release_line(),
            },
            (GameVersion::Other(a), GameVersion::Other(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameVersion::Any => write!(f, "Any"),
            GameVersion::Release(v) if v.patch == 0 => write!(f, "{}.{}", v.major, v.minor),
            GameVersion::Release(v) => write!(f, "{}.{}.{}", v.major, v.minor, v.patch),
            GameVersion::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for GameVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(GameVersion::parse(s))
    }
}

impl From<String> for GameVersion {
    fn from(s: String) -> Self {
        GameVersion::parse(&s)
    }
}

impl From<&str> for GameVersion {
    fn from(s: &str) -> Self {
        GameVersion::parse(s)
    }
}

impl From<GameVersion> for String {
    fn from(v: GameVersion) -> Self {
        v.to_string()
    }
}
