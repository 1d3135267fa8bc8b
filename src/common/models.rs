// Entity and input types shared by the store, the services and the transport adapter
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::common::error::{MarketError, MarketResult};

/// Enums persisted as lowercase TEXT columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(MarketError::Validation(format!(
                        "unknown {} '{}'", stringify!($name), other
                    ))),
                }
            }
        }
    };
}

text_enum!(Role {
    Client => "client",
    Freelancer => "freelancer",
    Admin => "admin",
});

text_enum!(BudgetType {
    Fixed => "fixed",
    Hourly => "hourly",
});

text_enum!(ExperienceLevel {
    Entry => "entry",
    Intermediate => "intermediate",
    Expert => "expert",
});

text_enum!(JobStatus {
    Open => "open",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

text_enum!(ProposalStatus {
    Submitted => "submitted",
    Interviewing => "interviewing",
    Accepted => "accepted",
    Rejected => "rejected",
});

text_enum!(ContractStatus {
    Pending => "pending",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

text_enum!(Decision {
    Accept => "accept",
    Reject => "reject",
});

text_enum!(ContractAction {
    Approve => "approve",
    Complete => "complete",
    Cancel => "cancel",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Forward-only progression; `cancelled` is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Open, JobStatus::InProgress) => true,
            (JobStatus::InProgress, JobStatus::Completed) => true,
            (from, JobStatus::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl ProposalStatus {
    /// Anything not rejected still blocks a second proposal from the same freelancer.
    pub fn is_live(&self) -> bool {
        !matches!(self, ProposalStatus::Rejected)
    }
}

impl ContractStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractStatus::Completed | ContractStatus::Cancelled)
    }

    /// pending --approve--> active --complete--> completed, and cancel from
    /// pending or active. Returns None for every other pair.
    pub fn apply(&self, action: ContractAction) -> Option<ContractStatus> {
        match (self, action) {
            (ContractStatus::Pending, ContractAction::Approve) => Some(ContractStatus::Active),
            (ContractStatus::Active, ContractAction::Complete) => Some(ContractStatus::Completed),
            (ContractStatus::Pending, ContractAction::Cancel)
            | (ContractStatus::Active, ContractAction::Cancel) => Some(ContractStatus::Cancelled),
            _ => None,
        }
    }
}

/// The verified caller handed to every operation by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn require_role(&self, role: Role) -> MarketResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(MarketError::Role(format!("operation requires role {}", role)))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub bio: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub hourly_rate: Option<f64>,
    pub skills: Vec<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A user together with the derived suspension flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub suspended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub description: String,
    pub client_id: String,
    pub category: String,
    pub budget_type: BudgetType,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub hourly_rate: Option<f64>,
    pub experience_level: ExperienceLevel,
    pub skills: Vec<String>,
    pub status: JobStatus,
    pub proposal_count: i64,
    pub remote: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub job_id: String,
    pub freelancer_id: String,
    pub cover_letter: String,
    pub proposed_rate: f64,
    pub timeline: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub job_id: String,
    pub freelancer_id: String,
    pub client_id: String,
    pub proposal_id: String,
    pub status: ContractStatus,
    pub total_earnings: f64,
    pub hours_worked: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.client_id == user_id || self.freelancer_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub job_id: Option<String>,
    pub proposal_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Derived view of the message log between the requesting user and one other participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub other_user: User,
    pub last_message: Message,
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub id: String,
    pub user_id: String,
    pub admin_id: String,
    pub reason: String,
    pub suspended_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Suspension {
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.suspended_until.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminStats {
    pub id: String,
    pub total_users: i64,
    pub total_jobs: i64,
    pub total_proposals: i64,
    pub total_contracts: i64,
    pub total_revenue: f64,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of `decide_proposal`: the contract is present only on accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDecision {
    pub proposal: Proposal,
    pub contract: Option<Contract>,
}

// ---- validated inputs ----

fn require_text(field: &str, value: &str) -> MarketResult<()> {
    if value.trim().is_empty() {
        Err(MarketError::Validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

fn require_positive(field: &str, value: Option<f64>) -> MarketResult<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(_) => Err(MarketError::Validation(format!("{} must be greater than zero", field))),
        None => Err(MarketError::Validation(format!("{} is required", field))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewUser {
    pub email: String,
    pub role: Role,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> MarketResult<()> {
        require_text("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(MarketError::Validation("email is malformed".to_string()));
        }
        require_text("name", &self.name)?;
        if let Some(rate) = self.hourly_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(MarketError::Validation("hourly_rate must not be negative".to_string()));
            }
        }
        Ok(())
    }
}

/// Self-service profile update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ProfilePatch {
    pub fn validate(&self) -> MarketResult<()> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(rate) = self.hourly_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(MarketError::Validation("hourly_rate must not be negative".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub budget_type: BudgetType,
    #[serde(default)]
    pub budget_min: Option<f64>,
    #[serde(default)]
    pub budget_max: Option<f64>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    pub experience_level: ExperienceLevel,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub remote: bool,
}

impl JobDraft {
    pub fn validate(&self) -> MarketResult<()> {
        require_text("title", &self.title)?;
        require_text("description", &self.description)?;
        match &self.category {
            Some(c) => require_text("category", c)?,
            None => return Err(MarketError::Validation("category is required".to_string())),
        }
        if self.skills.is_empty() || self.skills.iter().any(|s| s.trim().is_empty()) {
            return Err(MarketError::Validation("at least one non-empty skill is required".to_string()));
        }
        match self.budget_type {
            BudgetType::Fixed => {
                let min = require_positive("budget_min", self.budget_min)?;
                let max = require_positive("budget_max", self.budget_max)?;
                if max <= min {
                    return Err(MarketError::Validation(
                        "budget_max must be greater than budget_min".to_string(),
                    ));
                }
                if self.hourly_rate.is_some() {
                    return Err(MarketError::Validation(
                        "hourly_rate is not allowed on a fixed budget".to_string(),
                    ));
                }
            }
            BudgetType::Hourly => {
                require_positive("hourly_rate", self.hourly_rate)?;
                if self.budget_min.is_some() || self.budget_max.is_some() {
                    return Err(MarketError::Validation(
                        "budget_min/budget_max are not allowed on an hourly budget".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalDraft {
    pub cover_letter: String,
    pub proposed_rate: f64,
    pub timeline: String,
}

impl ProposalDraft {
    pub fn validate(&self) -> MarketResult<()> {
        require_text("cover_letter", &self.cover_letter)?;
        require_positive("proposed_rate", Some(self.proposed_rate))?;
        require_text("timeline", &self.timeline)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub proposal_id: Option<String>,
}
