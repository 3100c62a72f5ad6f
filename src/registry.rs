use std::collections::HashMap;

use anyhow::Result;

use crate::error::PipelineError;
use crate::match_data::MatchRecord;

/// Bijection between team names and the dense 1-based ids the model works
/// in. Ids follow first appearance in the training match list, then any
/// schedule-only teams, so a given input always produces the same mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamRegistry {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl TeamRegistry {
    pub fn from_first_appearance(matches: &[MatchRecord], schedule_teams: &[String]) -> Self {
        let mut registry = Self {
            names: Vec::new(),
            ids: HashMap::new(),
        };
        for m in matches {
            registry.insert_if_new(&m.home_team);
            registry.insert_if_new(&m.away_team);
        }
        for name in schedule_teams {
            registry.insert_if_new(name);
        }
        registry
    }

    /// Rebuild from a persisted name list (artifact reload path).
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        let mut registry = Self {
            names: Vec::new(),
            ids: HashMap::new(),
        };
        for name in &names {
            if !registry.insert_if_new(name) {
                return Err(PipelineError::ArtifactRejected {
                    reason: format!("duplicate team '{name}' in stored registry"),
                }
                .into());
            }
        }
        Ok(registry)
    }

    fn insert_if_new(&mut self, name: &str) -> bool {
        if self.ids.contains_key(name) {
            return false;
        }
        let id = self.names.len() as u32 + 1;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        true
    }

    pub fn id_of(&self, name: &str) -> Result<u32> {
        self.ids.get(name).copied().ok_or_else(|| {
            PipelineError::UnknownTeam {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.names.get(id as usize - 1).map(String::as_str)
    }

    pub fn num_teams(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in id order; `names()[i]` is the team with id `i + 1`.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
