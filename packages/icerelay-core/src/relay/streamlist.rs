//! Pulls a master's mount list via its admin HTTP API, for drift
//! reconciliation against statically configured relays.
//!
//! Grounded on the teacher's `sonos/soap.rs` request/logging shape,
//! adapted for a plain authenticated GET against `/admin/streams` with a
//! `/admin/streamlist.txt` fallback, per the line-oriented format the
//! original master admin API uses.

use reqwest::{Client, StatusCode};

use crate::config::{MasterPullConfig, RelayConfig, RelayMaster};
use crate::error::RelayError;
use crate::relay::http_client::basic_auth_header;

fn streams_url(config: &MasterPullConfig) -> String {
    format!("http://{}:{}/admin/streams", config.host, config.port)
}

fn streamlist_txt_url(config: &MasterPullConfig) -> String {
    format!("http://{}:{}/admin/streamlist.txt", config.host, config.port)
}

/// Pulls the master's current mount list, trying `/admin/streams` first and
/// falling back to `/admin/streamlist.txt` on a non-2xx response.
pub async fn pull_streamlist(client: &Client, config: &MasterPullConfig) -> Result<String, RelayError> {
    let body = fetch(client, config, &streams_url(config)).await;
    match body {
        Ok(text) => Ok(text),
        Err(_) => fetch(client, config, &streamlist_txt_url(config)).await,
    }
}

async fn fetch(client: &Client, config: &MasterPullConfig, url: &str) -> Result<String, RelayError> {
    let mut request = client.get(url);
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        request = request.header("Authorization", basic_auth_header(user, pass));
    }
    let response = request.send().await.map_err(|e| RelayError::Http(e.to_string()))?;
    if response.status() != StatusCode::OK {
        return Err(RelayError::BadStatus(response.status().as_u16()));
    }
    response.text().await.map_err(|e| RelayError::Http(e.to_string()))
}

/// Parses a line-oriented streamlist body into relay descriptors pointed
/// back at `config`'s host/port, one master entry each.
///
/// Each non-empty line starting with `/` yields one relay. A line of the
/// form `/admin/streams?mount=/X` canonicalizes to localmount `/X`;
/// anything else is taken as the localmount directly.
pub fn parse_streamlist(body: &str, config: &MasterPullConfig) -> Vec<RelayConfig> {
    body.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .filter_map(|line| canonical_mount(line))
        .map(|localmount| RelayConfig {
            localmount: localmount.clone(),
            masters: vec![RelayMaster {
                ip: config.host.clone(),
                port: config.port,
                mount: localmount,
                bind: None,
                timeout_ms: 4000,
                skip: false,
            }],
            username: config.username.clone(),
            password: config.password.clone(),
            mp3_metadata: true,
            on_demand: false,
            retry_interval_secs: 15,
        })
        .collect()
}

fn canonical_mount(line: &str) -> Option<String> {
    if let Some(query_start) = line.find('?') {
        let query = &line[query_start + 1..];
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("mount=") {
                return Some(value.to_string());
            }
        }
        None
    } else if line.len() > 1 {
        Some(line.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MasterPullConfig {
        MasterPullConfig {
            host: "relay.example.com".to_string(),
            port: 8000,
            username: None,
            password: None,
            update_interval_secs: 120,
        }
    }

    #[test]
    fn plain_mount_lines_become_relays_with_matching_localmount() {
        let relays = parse_streamlist("/foo\n/bar\n", &config());
        assert_eq!(relays.len(), 2);
        assert_eq!(relays[0].localmount, "/foo");
        assert_eq!(relays[1].localmount, "/bar");
    }

    #[test]
    fn admin_streams_query_form_canonicalizes_to_mount_value() {
        let relays = parse_streamlist("/admin/streams?mount=/bar\n", &config());
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].localmount, "/bar");
    }

    #[test]
    fn relay_masters_point_back_at_the_queried_host() {
        let relays = parse_streamlist("/foo\n", &config());
        assert_eq!(relays[0].masters[0].ip, "relay.example.com");
        assert_eq!(relays[0].masters[0].port, 8000);
    }

    #[test]
    fn blank_and_non_slash_lines_are_ignored() {
        let relays = parse_streamlist("\n   \nnotamount\n/ok\n", &config());
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0].localmount, "/ok");
    }

    #[test]
    fn mixed_streamlist_matches_two_relay_sample() {
        let relays = parse_streamlist("/foo\n/admin/streams?mount=/bar\n", &config());
        let localmounts: Vec<&str> = relays.iter().map(|r| r.localmount.as_str()).collect();
        assert_eq!(localmounts, vec!["/foo", "/bar"]);
    }
}
