//! Pipeline stage constants and the stage-to-probability table.

pub const LEAD: &str = "LEAD";
pub const CONTACTED: &str = "CONTACTED";
pub const MEETING: &str = "MEETING";
pub const PROPOSAL: &str = "PROPOSAL";
pub const NEGOTIATION: &str = "NEGOTIATION";
pub const CLOSED_WON: &str = "CLOSED_WON";
pub const CLOSED_LOST: &str = "CLOSED_LOST";

// QUALIFIED has a default probability assigned below but is not part of the
// stage list the filters accept. Pending product confirmation on whether it
// becomes a real stage or leaves the table.
pub const QUALIFIED: &str = "QUALIFIED";

/// Stages accepted by stage filters, in conventional progression order.
/// Transitions themselves are unrestricted: any stage may move to any other,
/// including back out of a closed stage.
pub const STAGES: [&str; 7] = [
    LEAD,
    CONTACTED,
    MEETING,
    PROPOSAL,
    NEGOTIATION,
    CLOSED_WON,
    CLOSED_LOST,
];

/// Single source of truth for default probabilities. Used whenever a
/// transition sets a stage without an explicit probability override.
pub const STAGE_PROBABILITIES: [(&str, i64); 7] = [
    (LEAD, 10),
    (CONTACTED, 25),
    (QUALIFIED, 50),
    (PROPOSAL, 75),
    (NEGOTIATION, 90),
    (CLOSED_WON, 100),
    (CLOSED_LOST, 0),
];

/// Fallback for stage values the table does not list.
pub const DEFAULT_PROBABILITY: i64 = 25;

pub fn default_probability(stage: &str) -> i64 {
    STAGE_PROBABILITIES
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, p)| *p)
        .unwrap_or(DEFAULT_PROBABILITY)
}

pub fn is_valid_stage(stage: &str) -> bool {
    STAGES.contains(&stage)
}

/// Closed stages are terminal by convention only; nothing stops a later
/// transition out of them.
pub fn is_terminal(stage: &str) -> bool {
    stage == CLOSED_WON || stage == CLOSED_LOST
}
