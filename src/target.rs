//! Target matching for the publisher channel (spec §4.9, §3 WorkerPoolConfig
//! sibling concept "tgt_type"). Three matcher kinds mirror Salt's targeting
//! language: `list` (literal membership), `glob` (shell-style wildcard over
//! a known minion-id universe), and `pcre` (regular expression over the
//! same universe).

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    List(Vec<String>),
    Glob(String),
    Pcre(String),
}

impl TargetSpec {
    pub fn from_type_and_value(tgt_type: &str, tgt: &serde_json::Value) -> Result<Self> {
        match tgt_type {
            "list" => {
                let items = tgt
                    .as_array()
                    .ok_or_else(|| CoreError::Decode("list target requires an array".into()))?
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(String::from)
                            .ok_or_else(|| CoreError::Decode("list target entries must be strings".into()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(TargetSpec::List(items))
            }
            "glob" => {
                let pattern = tgt
                    .as_str()
                    .ok_or_else(|| CoreError::Decode("glob target requires a string".into()))?
                    .to_string();
                Ok(TargetSpec::Glob(pattern))
            }
            "pcre" => {
                let pattern = tgt
                    .as_str()
                    .ok_or_else(|| CoreError::Decode("pcre target requires a string".into()))?
                    .to_string();
                Ok(TargetSpec::Pcre(pattern))
            }
            other => Err(CoreError::Decode(format!("unsupported target type '{other}'"))),
        }
    }

    /// Matching minion IDs from `universe` (spec §4.9 step 5). `list`
    /// returns its literal members verbatim, without reference to
    /// `universe`, matching the forward-the-literal-target-list rule.
    pub fn matches<'a>(&self, universe: impl Iterator<Item = &'a str>) -> Result<Vec<String>> {
        match self {
            TargetSpec::List(ids) => Ok(ids.clone()),
            TargetSpec::Glob(pattern) => {
                let matcher = glob::Pattern::new(pattern)
                    .map_err(|e| CoreError::Decode(format!("invalid glob pattern: {e}")))?;
                Ok(universe.filter(|id| matcher.matches(id)).map(String::from).collect())
            }
            TargetSpec::Pcre(pattern) => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| CoreError::Decode(format!("invalid pcre pattern: {e}")))?;
                Ok(universe.filter(|id| re.is_match(id)).map(String::from).collect())
            }
        }
    }
}
