use serde::Serialize;

/// One question of the fixed discovery script.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryQuestion {
    pub id: &'static str,
    pub category: &'static str,
    pub prompt: &'static str,
}

/// The ordered discovery script, grouped by category. At most 20 questions;
/// all are required unless the user explicitly confirms early.
pub const DISCOVERY_SCRIPT: &[DiscoveryQuestion] = &[
    DiscoveryQuestion {
        id: "goals.problem",
        category: "goals",
        prompt: "What problem does this project solve, and for whom?",
    },
    DiscoveryQuestion {
        id: "goals.success",
        category: "goals",
        prompt: "What does success look like for the first release?",
    },
    DiscoveryQuestion {
        id: "users.primary",
        category: "users",
        prompt: "Who are the primary users and how technical are they?",
    },
    DiscoveryQuestion {
        id: "users.workflows",
        category: "users",
        prompt: "Walk through the two or three most important user workflows.",
    },
    DiscoveryQuestion {
        id: "features.core",
        category: "features",
        prompt: "Which features are must-haves for the first version?",
    },
    DiscoveryQuestion {
        id: "features.excluded",
        category: "features",
        prompt: "What is explicitly out of scope for now?",
    },
    DiscoveryQuestion {
        id: "technical.stack",
        category: "technical",
        prompt: "Any constraints on languages, frameworks, or hosting?",
    },
    DiscoveryQuestion {
        id: "technical.integrations",
        category: "technical",
        prompt: "Which external services or APIs must this integrate with?",
    },
    DiscoveryQuestion {
        id: "technical.data",
        category: "technical",
        prompt: "What data does the system store, and are there privacy requirements?",
    },
    DiscoveryQuestion {
        id: "quality.testing",
        category: "quality",
        prompt: "What level of automated testing do you expect?",
    },
    DiscoveryQuestion {
        id: "timeline.deadline",
        category: "timeline",
        prompt: "Is there a deadline or milestone driving this work?",
    },
    DiscoveryQuestion {
        id: "timeline.priorities",
        category: "timeline",
        prompt: "If time runs short, what gets cut first?",
    },
];

/// Locate a question by id.
pub fn question_by_id(id: &str) -> Option<&'static DiscoveryQuestion> {
    DISCOVERY_SCRIPT.iter().find(|q| q.id == id)
}

/// The first script question not in `answered_ids`, with its index.
pub fn next_unanswered(answered_ids: &[String]) -> Option<(usize, &'static DiscoveryQuestion)> {
    DISCOVERY_SCRIPT
        .iter()
        .enumerate()
        .find(|(_, q)| !answered_ids.iter().any(|a| a == q.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_bounded_and_unique() {
        assert!(DISCOVERY_SCRIPT.len() <= 20);
        let mut ids: Vec<&str> = DISCOVERY_SCRIPT.iter().map(|q| q.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DISCOVERY_SCRIPT.len());
    }

    #[test]
    fn test_next_unanswered_walks_in_order() {
        let (idx, first) = next_unanswered(&[]).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(first.id, "goals.problem");

        let answered = vec!["goals.problem".to_string()];
        let (idx, second) = next_unanswered(&answered).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(second.id, "goals.success");
    }

    #[test]
    fn test_all_answered_returns_none() {
        let answered: Vec<String> = DISCOVERY_SCRIPT.iter().map(|q| q.id.to_string()).collect();
        assert!(next_unanswered(&answered).is_none());
    }
}
