//! Parsing of `scheme://rest` address URIs: `inproc://name`,
//! `local://path-or-pipename`, `tcp://host-or-*:port`.

/// Splits an address URI into its scheme and the remainder after `://`.
/// Returns `None` if there is no `://` separator.
pub fn parse(address: &str) -> Option<(&str, &str)> {
    address.split_once("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_scheme_and_rest() {
        assert_eq!(parse("inproc://quotesource"), Some(("inproc", "quotesource")));
        assert_eq!(parse("tcp://*:4444"), Some(("tcp", "*:4444")));
        assert_eq!(parse("local:///tmp/broker.sock"), Some(("local", "/tmp/broker.sock")));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert_eq!(parse("no-scheme-here"), None);
    }
}
