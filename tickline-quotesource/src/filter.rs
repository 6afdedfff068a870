//! Per-session subscription filter over tick streams.

use std::collections::HashSet;

use crate::error::QuoteSourceError;

/// A predicate over ticker strings: either an exact set, or the wildcard
/// `*` matching every ticker. Only the `t:` (tick) stream prefix is
/// supported; any other prefix is a parameter error.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    Wildcard,
    Exact(HashSet<String>),
}

impl SubscriptionFilter {
    /// Builds a filter from the raw `tickers` list of a `start-stream`
    /// request, each entry expected in `t:NAME` or `t:*` form.
    pub fn from_requests(tickers: &[String]) -> Result<Self, QuoteSourceError> {
        let mut exact = HashSet::new();
        for raw in tickers {
            let Some(name) = raw.strip_prefix("t:") else {
                return Err(QuoteSourceError::Parameter(format!(
                    "unsupported stream prefix in {raw:?}, only t: is supported"
                )));
            };
            if name == "*" {
                return Ok(Self::Wildcard);
            }
            exact.insert(name.to_string());
        }
        Ok(Self::Exact(exact))
    }

    pub fn matches(&self, ticker: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Exact(set) => set.contains(ticker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_anything() {
        let filter = SubscriptionFilter::from_requests(&["t:*".into()]).unwrap();
        assert!(filter.matches("FOO"));
        assert!(filter.matches("BAR"));
    }

    #[test]
    fn exact_set_matches_only_listed_tickers() {
        let filter =
            SubscriptionFilter::from_requests(&["t:FOO".into(), "t:BAR".into()]).unwrap();
        assert!(filter.matches("FOO"));
        assert!(!filter.matches("BAZ"));
    }

    #[test]
    fn unsupported_prefix_is_a_parameter_error() {
        let result = SubscriptionFilter::from_requests(&["q:FOO".into()]);
        assert!(matches!(result, Err(QuoteSourceError::Parameter(_))));
    }
}
