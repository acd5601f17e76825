//! Optional remote bootstrap relay list.
//!
//! A JSON document `{"browser": [addr, ...], "server": [addr, ...]}` served
//! over HTTPS. Fetched once at relay initialisation and merged with the
//! static configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::CoordError;
use crate::types::NodeClass;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteRelayList {
    pub browser: Vec<String>,
    pub server: Vec<String>,
}

impl RemoteRelayList {
    pub fn for_class(&self, class: NodeClass) -> &[String] {
        match class {
            NodeClass::Browser => &self.browser,
            NodeClass::Server => &self.server,
        }
    }
}

pub async fn fetch_relay_list(url: &str) -> Result<RemoteRelayList, CoordError> {
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let list = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<RemoteRelayList>()
        .await?;
    tracing::debug!(
        url,
        browser = list.browser.len(),
        server = list.server.len(),
        "fetched remote relay list"
    );
    Ok(list)
}

/// Append the entries of `extra` not already in `base`, keeping order.
pub fn merge_relay_addrs(base: &mut Vec<String>, extra: &[String]) {
    for addr in extra {
        if !base.contains(addr) {
            base.push(addr.clone());
        }
    }
}
