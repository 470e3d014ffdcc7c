use std::collections::HashSet;

use shared::domain::{AdminId, AdminIdentity};

/// Decides whether an admin may submit scores.
pub trait ScoringPolicy: Send + Sync {
    fn can_score(&self, admin: &AdminIdentity) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ScoringPolicy for AllowAll {
    fn can_score(&self, _admin: &AdminIdentity) -> bool {
        true
    }
}

/// Only the listed admin ids may score.
#[derive(Debug, Default, Clone)]
pub struct ScoringRoster {
    admins: HashSet<AdminId>,
}

impl ScoringRoster {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins
                .into_iter()
                .map(Into::into)
                .map(|id: String| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .map(AdminId)
                .collect(),
        }
    }
}

impl ScoringPolicy for ScoringRoster {
    fn can_score(&self, admin: &AdminIdentity) -> bool {
        self.admins.contains(&admin.id)
    }
}
