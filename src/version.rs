//! Version parsing and ordering.
//!
//! Addon and Python package versions follow PEP 440 closely enough that
//! [`LooseVersion`] orders them the way `pip` does: every release component
//! counts, `a`/`b`/`rc` sort before the final release, `.postN` after it and
//! `.devN` before both. Blender and interpreter banners only need
//! major.minor.patch, so [`parse_lenient`] maps them onto [`semver::Version`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[allow(clippy::expect_used)]
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^
        v?
        (?:(?P<epoch>[0-9]+)!)?
        (?P<release>[0-9]+(?:\.[0-9]+)*)
        (?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>[0-9]+)?)?
        (?:-(?P<post_n1>[0-9]+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?)?
        (?:[-_.]?(?P<dev>dev)[-_.]?(?P<dev_n>[0-9]+)?)?",
    )
    .expect("version pattern compiles")
});

/// Number of release components every version carries at least.
const MIN_RELEASE_LEN: usize = 3;

/// Pre-release phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    /// `aN`, `alphaN`.
    Alpha(u64),
    /// `bN`, `betaN`.
    Beta(u64),
    /// `rcN`, `cN`, `preN`, `previewN`.
    Candidate(u64),
}

/// A PEP 440 style version.
///
/// The release is padded to three components and trailing zeros past the
/// third are dropped, so `1.2` and `1.2.0.0` are the same version. Local
/// labels (`+cpu`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LooseVersion {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<PreRelease>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl LooseVersion {
    /// Final release with the given components, e.g. a `bl_info` tuple.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn from_release(parts: &[u64]) -> Option<Self> {
        if parts.is_empty() {
            return None;
        }
        Some(Self {
            epoch: 0,
            release: normalize_release(parts.to_vec()),
            pre: None,
            post: None,
            dev: None,
        })
    }

    /// Parses the first whitespace separated token of `text`.
    ///
    /// Trailing text the grammar does not cover is ignored, so `1.0+cpu` and
    /// `1.0.x` both read as `1.0`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let caps = VERSION_PATTERN.captures(token)?;
        let number = |name: &str| -> Option<Option<u64>> {
            match caps.name(name) {
                Some(m) => m.as_str().parse().ok().map(Some),
                None => Some(None),
            }
        };

        let release = caps
            .name("release")?
            .as_str()
            .split('.')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let n = number("pre_n")?.unwrap_or(0);
                Some(match label.as_str().to_ascii_lowercase().as_str() {
                    "a" | "alpha" => PreRelease::Alpha(n),
                    "b" | "beta" => PreRelease::Beta(n),
                    _ => PreRelease::Candidate(n),
                })
            }
            None => None,
        };

        let post = match number("post_n1")? {
            Some(n) => Some(n),
            None if caps.name("post_l").is_some() => Some(number("post_n2")?.unwrap_or(0)),
            None => None,
        };

        let dev = match caps.name("dev") {
            Some(_) => Some(number("dev_n")?.unwrap_or(0)),
            None => None,
        };

        Some(Self {
            epoch: number("epoch")?.unwrap_or(0),
            release: normalize_release(release),
            pre,
            post,
            dev,
        })
    }

    /// Release components.
    #[must_use]
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Pre-release phase, if any.
    #[must_use]
    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    /// Post-release number, if any.
    #[must_use]
    pub fn post(&self) -> Option<u64> {
        self.post
    }

    /// Development release number, if any.
    #[must_use]
    pub fn dev(&self) -> Option<u64> {
        self.dev
    }

    /// Returns true for alpha, beta, candidate and dev releases.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// major.minor.patch as a semver version, dropping everything else.
    #[must_use]
    pub fn to_semver(&self) -> semver::Version {
        let get = |i: usize| self.release.get(i).copied().unwrap_or(0);
        semver::Version::new(get(0), get(1), get(2))
    }

    // A dev release of a final version sorts before all of its pre-releases.
    fn pre_key(&self) -> (u8, Option<PreRelease>) {
        match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (0, None),
            (Some(pre), _, _) => (1, Some(pre)),
            (None, _, _) => (2, None),
        }
    }

    fn post_key(&self) -> (u8, u64) {
        self.post.map_or((0, 0), |n| (1, n))
    }

    fn dev_key(&self) -> (u8, u64) {
        self.dev.map_or((1, 0), |n| (0, n))
    }
}

fn normalize_release(mut release: Vec<u64>) -> Vec<u64> {
    while release.len() > MIN_RELEASE_LEN && release.last() == Some(&0) {
        release.pop();
    }
    while release.len() < MIN_RELEASE_LEN {
        release.push(0);
    }
    release
}

fn cmp_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| cmp_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post_key().cmp(&other.post_key()))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(u64::to_string).collect();
        f.write_str(&release.join("."))?;
        match self.pre {
            Some(PreRelease::Alpha(n)) => write!(f, "a{}", n)?,
            Some(PreRelease::Beta(n)) => write!(f, "b{}", n)?,
            Some(PreRelease::Candidate(n)) => write!(f, "rc{}", n)?,
            None => {}
        }
        if let Some(n) = self.post {
            write!(f, ".post{}", n)?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{}", n)?;
        }
        Ok(())
    }
}

impl FromStr for LooseVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid version: {}", s))
    }
}

impl Serialize for LooseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LooseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a banner version leniently into major.minor.patch.
///
/// Only the first whitespace separated token is considered; pre and post
/// release detail is dropped.
#[must_use]
pub fn parse_lenient(text: &str) -> Option<semver::Version> {
    LooseVersion::parse(text).map(|v| v.to_semver())
}
