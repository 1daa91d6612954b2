use std::convert::TryFrom;
use std::fmt;

use regex::Regex;

use crate::analysis::core::hierarchy::TypeHierarchy;
use crate::roa_debug;

/// Matches a class name, method name or signature of a call site.
#[derive(Debug, Clone)]
pub enum Matcher {
    Any,
    Exact(String),
    Regex(Regex),
    /// Matches the named type and its subtypes; compares exactly on non-type strings.
    SubtypeOf(String),
}

impl Matcher {
    pub fn exact(value: impl Into<String>) -> Self {
        Matcher::Exact(value.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Matcher::Regex)
    }

    pub fn subtype_of(class: impl Into<String>) -> Self {
        Matcher::SubtypeOf(class.into())
    }

    pub fn matches_str(&self, value: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exact(expected) | Matcher::SubtypeOf(expected) => expected == value,
            Matcher::Regex(regex) => regex.is_match(value),
        }
    }

    pub fn matches_type<H>(&self, ty: &str, hierarchy: &H) -> bool
    where
        H: TypeHierarchy + ?Sized,
    {
        match self {
            Matcher::SubtypeOf(sup) => match hierarchy.is_subtype_of(ty, sup) {
                Ok(is_subtype) => is_subtype,
                Err(err) => {
                    roa_debug!("Treating {} <: {} as false: {}", ty, sup, err);
                    false
                }
            },
            other => other.matches_str(ty),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Any => write!(f, "*"),
            Matcher::Exact(value) => write!(f, "{}", value),
            Matcher::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            Matcher::SubtypeOf(class) => write!(f, "+{}", class),
        }
    }
}

/// Serialized form of a [`Matcher`] in policy files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    Any,
    Exact(String),
    Regex(String),
    Subtype(String),
}

impl Default for MatcherSpec {
    fn default() -> Self {
        MatcherSpec::Any
    }
}

impl TryFrom<&MatcherSpec> for Matcher {
    type Error = regex::Error;

    fn try_from(spec: &MatcherSpec) -> Result<Self, Self::Error> {
        Ok(match spec {
            MatcherSpec::Any => Matcher::Any,
            MatcherSpec::Exact(value) => Matcher::exact(value.clone()),
            MatcherSpec::Regex(pattern) => Matcher::regex(pattern)?,
            MatcherSpec::Subtype(class) => Matcher::subtype_of(class.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::core::hierarchy::ClassHierarchy;

    #[test]
    fn subtype_matcher_follows_hierarchy() {
        let hierarchy = ClassHierarchy::new();
        let matcher = Matcher::subtype_of("java.io.InputStream");
        assert!(matcher.matches_type("java.io.FileInputStream", &hierarchy));
        assert!(!matcher.matches_type("java.io.Writer", &hierarchy));
        assert!(!matcher.matches_type("com.example.Missing", &hierarchy));
    }

    #[test]
    fn regex_matches_connection_signatures() {
        let matcher = Matcher::regex(r"^.*\)Ljava/sql/Connection;$").unwrap();
        assert!(matcher.matches_str("(Ljava/lang/String;)Ljava/sql/Connection;"));
        assert!(!matcher.matches_str("()V"));
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec: MatcherSpec = serde_json::from_str(r#"{"subtype": "java.io.Reader"}"#).unwrap();
        assert_eq!(spec, MatcherSpec::Subtype("java.io.Reader".to_string()));
        let matcher = Matcher::try_from(&spec).unwrap();
        assert_eq!(matcher.to_string(), "+java.io.Reader");
        assert!(Matcher::try_from(&MatcherSpec::Regex("(".to_string())).is_err());
    }
}
