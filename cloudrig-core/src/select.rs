//! Target selection by nickname or wildcard pattern.
//!
//! A selector is a comma-separated list. Entries without `*` must name an
//! existing nickname; entries with `*` are compiled into an anchored regex
//! where `*` matches one run of alphanumerics, and must match at least once.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("expected comma-separated list of {entity} nicknames or patterns")]
    Empty { entity: String },

    #[error("definition for {entity} '{nickname}' not found, available definitions: {}", available.join(", "))]
    NotFound {
        entity: String,
        nickname: String,
        available: Vec<String>,
    },

    #[error("no match found for {entity} '{pattern}', available definitions: {}", available.join(", "))]
    NoMatch {
        entity: String,
        pattern: String,
        available: Vec<String>,
    },

    #[error("invalid {entity} pattern '{pattern}': {reason}")]
    BadPattern {
        entity: String,
        pattern: String,
        reason: String,
    },
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[a-zA-Z0-9]*");
    Regex::new(&format!("^{}$", body))
}

/// Resolve `selector` against `collection`. Purely local.
pub fn select<'a, T>(
    selector: &str,
    collection: &'a BTreeMap<String, T>,
    entity: &str,
) -> Result<BTreeMap<String, &'a T>, SelectionError> {
    let available = || collection.keys().cloned().collect::<Vec<_>>();

    let entries: Vec<&str> = selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if entries.is_empty() {
        return Err(SelectionError::Empty {
            entity: entity.to_string(),
        });
    }

    let mut selected = BTreeMap::new();
    for entry in entries {
        if entry.contains('*') {
            let re = compile(entry).map_err(|e| SelectionError::BadPattern {
                entity: entity.to_string(),
                pattern: entry.to_string(),
                reason: e.to_string(),
            })?;
            let mut matched = false;
            for (nickname, def) in collection {
                if re.is_match(nickname) {
                    matched = true;
                    selected.insert(nickname.clone(), def);
                }
            }
            if !matched {
                return Err(SelectionError::NoMatch {
                    entity: entity.to_string(),
                    pattern: entry.to_string(),
                    available: available(),
                });
            }
        } else {
            let def = collection
                .get(entry)
                .ok_or_else(|| SelectionError::NotFound {
                    entity: entity.to_string(),
                    nickname: entry.to_string(),
                    available: available(),
                })?;
            selected.insert(entry.to_string(), def);
        }
    }
    Ok(selected)
}
