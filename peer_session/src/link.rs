//! Session invite links.
//!
//! A link is any url whose `sessionId` query parameter holds the id of the
//! peer to join.

use url::Url;

use crate::PeerId;

pub const SESSION_PARAM: &str = "sessionId";

pub fn invite_url(base: &Url, id: &PeerId) -> Url {
    let mut url = base.clone();
    let others: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(name, _)| name != SESSION_PARAM)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(others)
        .append_pair(SESSION_PARAM, id.as_str());
    url
}

pub fn session_from_url(url: &Url) -> Option<PeerId> {
    url.query_pairs()
        .find(|(name, value)| name == SESSION_PARAM && !value.is_empty())
        .map(|(_, value)| PeerId::from(value.into_owned()))
}

/// Accepts either an invite link or a bare peer id.
pub fn parse_join_target(target: &str) -> Option<PeerId> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    match Url::parse(target) {
        Ok(url) => session_from_url(&url),
        Err(_) => Some(PeerId::from(target)),
    }
}
