//! Derivation of the OAuth endpoints of OpenShift clusters from their API server URLs.
//!
//! OpenShift serves the API on `api.<cluster domain>` and routes on `apps.<cluster domain>`.

use snafu::{OptionExt, ResultExt, Snafu};
use url::Url;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse API server URL {url:?}"))]
    ParseUrl { source: url::ParseError, url: String },

    #[snafu(display("API server URL {url:?} has no host"))]
    MissingHost { url: String },
}

/// Scheme and ingress domain of the cluster serving its API at `api_server_url`.
///
/// `https://api.cluster1.example.com:6443` becomes `("https", "apps.cluster1.example.com")`.
pub fn apps_domain(api_server_url: &str) -> Result<(String, String)> {
    let url = Url::parse(api_server_url).context(ParseUrlSnafu {
        url: api_server_url,
    })?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .context(MissingHostSnafu {
            url: api_server_url,
        })?;

    Ok((url.scheme().to_owned(), host.replacen("api", "apps", 1)))
}

/// Callback URI of the OpenShift OAuth server for the identity provider `idp_name`.
pub fn redirect_uri(api_server_url: &str, idp_name: &str) -> Result<String> {
    let (scheme, domain) = apps_domain(api_server_url)?;
    Ok(format!(
        "{scheme}://oauth-openshift.{domain}/oauth2callback/{idp_name}"
    ))
}

/// Issuer URL of the authentication proxy exposed on the hub under `route_sub_domain`.
pub fn issuer_url(route_sub_domain: &str, hub_api_server_url: &str) -> Result<String> {
    let (_, domain) = apps_domain(hub_api_server_url)?;
    Ok(format!("https://{route_sub_domain}.{domain}"))
}
