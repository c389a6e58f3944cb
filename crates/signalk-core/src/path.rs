//! SignalK path handling.
//!
//! Paths are dot-separated ("navigation.speedOverGround"). The publisher
//! needs three things from them: the segments rewritten as MQTT topic levels,
//! child paths for decomposed composite values, and wildcard patterns to
//! select which paths a subscription delivers.

/// A parsed SignalK path.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    raw: String,
    segments: Vec<String>,
}

impl Path {
    pub fn new(path: &str) -> Self {
        Self {
            raw: path.to_string(),
            segments: path.split('.').map(String::from).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Join the segments with '/' for use as MQTT topic levels.
    ///
    /// "environment.depth.belowTransducer" becomes "environment/depth/belowTransducer".
    pub fn to_topic_levels(&self) -> String {
        self.segments.join("/")
    }

    /// Append a child segment, e.g. "navigation.position" + "latitude".
    pub fn child(&self, segment: &str) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Path {
            raw: format!("{}.{}", self.raw, segment),
            segments,
        }
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// A path selector that may contain `*` wildcards.
///
/// - `*` alone selects every path
/// - a trailing `*` selects any suffix ("navigation.*")
/// - a `*` in the middle stands for exactly one segment ("propulsion.*.revolutions")
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Option<String>>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.trim().is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let segments = pattern
            .split('.')
            .map(|s| (s != "*").then(|| s.to_string()))
            .collect();

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('.').collect();

        let (head, open_ended) = match self.segments.split_last() {
            Some((None, head)) => (head, true),
            _ => (self.segments.as_slice(), false),
        };

        if open_ended {
            if parts.len() < head.len() {
                return false;
            }
        } else if parts.len() != head.len() {
            return false;
        }

        head.iter().zip(&parts).all(|(segment, part)| match segment {
            Some(literal) => literal == part,
            None => !part.is_empty(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Errors that can occur when creating a path pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,
}
