use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::MarketError;
use crate::common::models::{Actor, ContractAction, Decision, JobDraft, NewMessage, NewUser, ProfilePatch, ProposalDraft};

/// One request line: the verified actor (absent only for registration) and the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(default)]
    pub actor: Option<Actor>,
    pub request: Request,
}

/// Every operation the core exposes, one variant each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case", deny_unknown_fields)]
pub enum Request {
    // users
    RegisterUser { user: NewUser },
    UpdateProfile { user_id: String, patch: ProfilePatch },
    GetUser { user_id: String },

    // jobs and proposals
    PostJob { draft: JobDraft },
    GetJob { job_id: String },
    ListOpenJobs,
    ListProposals { job_id: String },
    SubmitProposal { job_id: String, proposal: ProposalDraft },
    DecideProposal { proposal_id: String, decision: Decision },
    WithdrawProposal { proposal_id: String },
    CancelJob { job_id: String },

    // contracts
    AdvanceContract { contract_id: String, action: ContractAction },
    LogHours { contract_id: String, hours: f64 },
    GetContract { contract_id: String },
    ListContracts,

    // messaging
    SendMessage { message: NewMessage },
    ListConversations,
    ListMessages { other_user_id: String },
    MarkRead { other_user_id: String },

    // moderation
    SuspendUser {
        user_id: String,
        reason: String,
        #[serde(default)]
        until: Option<DateTime<Utc>>,
    },
    ReinstateUser { user_id: String },
    ListSuspensions { user_id: String },
    ChangeRole { user_id: String, new_role: String },
    DeleteUser {
        user_id: String,
        #[serde(default)]
        cascade: bool,
    },
    RecomputeStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: serde_json::Value) -> Self {
        Self { ok: true, data: Some(data), error: None }
    }

    pub fn failure(err: &MarketError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody { kind: err.kind().to_string(), message: err.to_string() }),
        }
    }
}

pub const MAX_REQUEST_LINE: usize = 64 * 1024;
