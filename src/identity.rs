use std::collections::HashMap;

use tracing::{debug, warn};

use crate::source::{GroupSnapshot, SourceClient};

/// Per-scrape mapping from raw participant identifiers to canonical phone
/// numbers. Built once per scrape invocation and passed by reference through
/// normalization; never persisted or reused across runs, since the source may
/// reassign opaque identifiers between sessions.
pub type IdentityMap = HashMap<String, String>;

/// Identifier domains whose local part is the phone number itself.
const PHONE_DOMAINS: [&str; 2] = ["c.us", "s.whatsapp.net"];

/// Extracts a canonical phone number from a phone-bearing identifier such as
/// `14155550123@c.us`. Returns `None` for opaque identifiers (`@lid`, groups,
/// anything without an all-digit local part).
pub fn phone_from_id(id: &str) -> Option<String> {
    let (local, domain) = id.split_once('@')?;
    if PHONE_DOMAINS.contains(&domain) && !local.is_empty() && local.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("+{local}"))
    } else {
        None
    }
}

/// Last-resort heuristic: an identifier whose local part looks like a bare
/// international phone number (10-15 digits) regardless of domain.
pub fn phone_from_plausible_local(id: &str) -> Option<String> {
    let local = id.split('@').next().unwrap_or(id);
    if (10..=15).contains(&local.len()) && local.bytes().all(|b| b.is_ascii_digit()) {
        Some(format!("+{local}"))
    } else {
        None
    }
}

/// Normalizes a source-provided number string to `+` followed by digits.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{digits}")
}

/// Builds the identity map for one group snapshot. Never fails: participants
/// that cannot be canonicalized are degraded to an identity mapping (raw id
/// to itself) rather than aborting the scrape.
pub async fn build_identity_map(
    client: &dyn SourceClient,
    snapshot: &GroupSnapshot,
) -> IdentityMap {
    let mut map = IdentityMap::with_capacity(snapshot.participants.len());

    for participant in &snapshot.participants {
        let id = &participant.id;

        if let Some(phone) = phone_from_id(id) {
            map.insert(id.clone(), phone);
            continue;
        }

        // Opaque identifier: ask the source for the linked contact.
        match client.resolve_contact(id).await {
            Ok(contact) => {
                if let Some(number) = contact.number.as_deref().filter(|n| !n.is_empty()) {
                    map.insert(id.clone(), normalize_phone(number));
                } else if let Some(phone) = phone_from_id(&contact.id) {
                    map.insert(id.clone(), phone);
                } else {
                    debug!(participant = %id, "contact carries no phone number, keeping raw id");
                    map.insert(id.clone(), id.clone());
                }
            }
            Err(e) => {
                warn!(participant = %id, error = %e, "contact lookup failed, keeping raw id");
                map.insert(id.clone(), id.clone());
            }
        }
    }

    debug!(
        group = %snapshot.id,
        participants = snapshot.participants.len(),
        mapped = map.len(),
        "identity map built"
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSourceClient;
    use crate::source::{ContactInfo, Participant};

    fn snapshot(ids: &[&str]) -> GroupSnapshot {
        GroupSnapshot {
            id: "123@g.us".to_string(),
            name: "Test Group".to_string(),
            is_group: true,
            participants: ids.iter().map(|id| Participant { id: id.to_string() }).collect(),
        }
    }

    #[test]
    fn phone_bearing_ids_extract_directly() {
        assert_eq!(phone_from_id("14155550123@c.us").as_deref(), Some("+14155550123"));
        assert_eq!(phone_from_id("4915112345678@s.whatsapp.net").as_deref(), Some("+4915112345678"));
        assert_eq!(phone_from_id("ABCDEF9876@lid"), None);
        assert_eq!(phone_from_id("123456789@g.us"), None);
        assert_eq!(phone_from_id("no-at-sign"), None);
        assert_eq!(phone_from_id("@c.us"), None);
    }

    #[test]
    fn plausible_local_requires_10_to_15_digits() {
        assert_eq!(phone_from_plausible_local("14155550123@lid").as_deref(), Some("+14155550123"));
        assert_eq!(phone_from_plausible_local("123456789@lid"), None); // 9 digits
        assert_eq!(phone_from_plausible_local("1234567890123456@lid"), None); // 16 digits
        assert_eq!(phone_from_plausible_local("abc1234567@lid"), None);
    }

    #[test]
    fn normalize_strips_formatting() {
        assert_eq!(normalize_phone("+1 (415) 555-0123"), "+14155550123");
        assert_eq!(normalize_phone("14155550123"), "+14155550123");
    }

    #[tokio::test]
    async fn map_prefers_direct_phone_ids_without_lookup() {
        let client = MockSourceClient::new();
        let map = build_identity_map(&client, &snapshot(&["14155550123@c.us"])).await;
        assert_eq!(map.get("14155550123@c.us").map(String::as_str), Some("+14155550123"));
        assert_eq!(client.contact_lookups(), 0);
    }

    #[tokio::test]
    async fn opaque_ids_resolve_through_contact_lookup() {
        let client = MockSourceClient::new();
        client.add_contact(ContactInfo {
            id: "OPAQUE1@lid".to_string(),
            number: Some("44 7911 123456".to_string()),
            pushname: None,
            name: None,
        });
        let map = build_identity_map(&client, &snapshot(&["OPAQUE1@lid"])).await;
        assert_eq!(map.get("OPAQUE1@lid").map(String::as_str), Some("+447911123456"));
    }

    #[tokio::test]
    async fn lookup_failure_degrades_to_identity_mapping() {
        let client = MockSourceClient::new();
        client.fail_contact_lookups();
        let map = build_identity_map(&client, &snapshot(&["OPAQUE2@lid"])).await;
        assert_eq!(map.get("OPAQUE2@lid").map(String::as_str), Some("OPAQUE2@lid"));
    }

    #[tokio::test]
    async fn contact_with_phone_bearing_id_but_no_number() {
        let client = MockSourceClient::new();
        client.add_contact(ContactInfo {
            id: "OPAQUE3@lid".to_string(),
            number: None,
            pushname: None,
            name: None,
        });
        // Contact exists but has neither a number nor a phone-bearing id.
        let map = build_identity_map(&client, &snapshot(&["OPAQUE3@lid"])).await;
        assert_eq!(map.get("OPAQUE3@lid").map(String::as_str), Some("OPAQUE3@lid"));
    }
}
