//! Grant diff: compares a user's ACL as printed by the agent with the
//! declared grant set.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::ConvergeError;

/// Key of the bare role marker the agent prints for users without grants.
const ROLES_KEY: &str = "roles";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantDiff {
    pub differs: bool,
    pub current: BTreeSet<String>,
}

/// Compare the raw `acl show` document for `username` against `desired`.
///
/// The agent answers either with a `capability -> bool` map or with a bare
/// `{"roles": [...]}` marker meaning no explicit grants are held. Anything
/// that is not a JSON object is an error: grants must not be written over a
/// state that could not be read.
pub fn diff_grants(
    username: &str,
    raw: &str,
    desired: &BTreeSet<String>,
) -> Result<GrantDiff, ConvergeError> {
    let doc: serde_json::Value = serde_json::from_str(raw.trim()).map_err(|e| {
        ConvergeError::inconsistency(username, format!("unparseable grant document: {}", e))
    })?;
    let map = doc.as_object().ok_or_else(|| {
        ConvergeError::inconsistency(username, format!("grant document is not an object: {}", doc))
    })?;

    if map.len() == 1 && map.contains_key(ROLES_KEY) {
        return Ok(GrantDiff {
            differs: !desired.is_empty(),
            current: BTreeSet::new(),
        });
    }

    let current: BTreeSet<String> = map
        .keys()
        .filter(|k| k.as_str() != ROLES_KEY)
        .cloned()
        .collect();
    let differs = current.symmetric_difference(desired).next().is_some();
    Ok(GrantDiff { differs, current })
}
