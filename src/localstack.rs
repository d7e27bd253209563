//! LocalStack endpoint discovery for the S3 transport.

use anyhow::{Context, Result};
use http::Uri;
use std::env;
use std::str::FromStr;

const DEFAULT_EDGE_PORT: &str = "4566";

/// Construct a LocalStack endpoint URI if the LOCALSTACK_HOSTNAME env var
/// has been set.
///
/// Ref: https://docs.localstack.cloud/localstack/configuration/
pub(crate) fn get_endpoint_uri() -> Result<Option<Uri>> {
    let Ok(host) = env::var("LOCALSTACK_HOSTNAME") else {
        return Ok(None);
    };
    let port = env::var("EDGE_PORT").unwrap_or_else(|_| DEFAULT_EDGE_PORT.to_string());
    let uri = format!("http://{host}:{port}");
    let uri = Uri::from_str(&uri).with_context(|| format!("Failed to parse LocalStack URI: {uri}"))?;
    Ok(Some(uri))
}


#[cfg(test)]
mod test {
    use super::*;

    use serial_test::serial;

    /// Run get_endpoint_uri() with the given host and port set, restoring
    /// the environment afterwards.
    fn with_env(host: Option<&str>, port: Option<&str>) -> Result<Option<Uri>> {
        let orig_host = env::var("LOCALSTACK_HOSTNAME");
        let orig_port = env::var("EDGE_PORT");

        set_or_remove("LOCALSTACK_HOSTNAME", host);
        set_or_remove("EDGE_PORT", port);
        let uri = get_endpoint_uri();
        set_or_remove("LOCALSTACK_HOSTNAME", orig_host.ok().as_deref());
        set_or_remove("EDGE_PORT", orig_port.ok().as_deref());

        uri
    }

    fn set_or_remove(key: &str, value: Option<&str>) {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    #[test]
    #[serial]
    fn test_no_localstack() {
        assert_eq!(with_env(None, None).unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_default_port() {
        let uri = with_env(Some("localstack"), None).unwrap();
        assert_eq!(uri, Some(Uri::from_static("http://localstack:4566")));
    }

    #[test]
    #[serial]
    fn test_custom_port() {
        let uri = with_env(Some("localstack"), Some("1234")).unwrap();
        assert_eq!(uri, Some(Uri::from_static("http://localstack:1234")));
    }

    #[test]
    #[serial]
    fn test_bad_uri() {
        let e = with_env(Some("bad:host"), Some("not-a-number")).unwrap_err();
        assert!(e.to_string().contains("LocalStack"));
    }
}
