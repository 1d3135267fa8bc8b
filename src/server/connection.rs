use crate::common::error::{MarketError, MarketResult};
use crate::common::models::Actor;
use crate::common::protocol::{Envelope, Request, Response, MAX_REQUEST_LINE};
use crate::server::config::ServerConfig;
use crate::server::database::{with_retry, Database};
use crate::server::{contracts, conversations, jobs, messages, moderation, users};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

/// Newline-delimited JSON front end. Actors arrive already verified by the
/// gateway in front of this listener; each line maps to exactly one core call.
#[derive(Clone)]
pub struct Server {
    pub db: Arc<Database>,
    pub config: ServerConfig,
}

fn to_data<T: Serialize>(value: T) -> MarketResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| MarketError::Transient(format!("response encoding failed: {}", e)))
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, response: &Response) -> anyhow::Result<()> {
    let mut out = serde_json::to_string(response)?;
    out.push('\n');
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn require_actor(actor: &Option<Actor>) -> MarketResult<&Actor> {
    actor
        .as_ref()
        .ok_or_else(|| MarketError::Role("an authenticated actor is required".to_string()))
}

impl Server {
    pub fn new(db: Arc<Database>, config: ServerConfig) -> Self {
        Self { db, config }
    }

    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("[SERVER] Listening on {}", addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("[SERVER] New connection from {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_client(stream).await {
                    warn!("[SERVER] Client error ({}): {}", peer, e);
                }
                debug!("[SERVER] Connection from {} closed", peer);
            });
        }
    }

    async fn handle_client(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (reader, writer) = stream.into_split();
        self.serve_lines(reader, writer).await
    }

    /// Answer one response line per request line until EOF. A line longer than
    /// `MAX_REQUEST_LINE` gets a validation error and ends the session.
    pub async fn serve_lines<R, W>(&self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);
        let mut line = String::new();

        loop {
            line.clear();
            let n = (&mut reader).take(MAX_REQUEST_LINE as u64 + 1).read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            if n > MAX_REQUEST_LINE && !line.ends_with('\n') {
                warn!("[SERVER] Dropping client after oversized request line");
                let response = Response::failure(&MarketError::Validation(format!(
                    "request exceeds {} bytes",
                    MAX_REQUEST_LINE
                )));
                write_response(&mut writer, &response).await?;
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response = self.handle_line(trimmed).await;
            write_response(&mut writer, &response).await?;
        }
    }

    /// Parse one request line, run it with retries on transient storage failures, and build the reply.
    pub async fn handle_line(&self, line: &str) -> Response {
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(env) => env,
            Err(e) => {
                debug!("[SERVER] Rejected malformed request: {}", e);
                return Response::failure(&MarketError::Validation(format!("malformed request: {}", e)));
            }
        };

        let result = with_retry(self.config.retry_policy(), || {
            let envelope = envelope.clone();
            async move { self.dispatch(envelope).await }
        })
        .await;

        match result {
            Ok(data) => Response::success(data),
            Err(e) => {
                if e.is_retryable() {
                    error!("[SERVER] Request failed after retries: {}", e);
                } else {
                    debug!("[SERVER] Request refused ({}): {}", e.kind(), e);
                }
                Response::failure(&e)
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) -> MarketResult<serde_json::Value> {
        let db = self.db.clone();
        let config = &self.config;
        let actor = &envelope.actor;

        match envelope.request {
            Request::RegisterUser { user } => to_data(users::register_user(db, user).await?),
            Request::UpdateProfile { user_id, patch } => {
                to_data(users::update_profile(db, require_actor(actor)?, &user_id, patch).await?)
            }
            Request::GetUser { user_id } => {
                require_actor(actor)?;
                to_data(users::get_user(db, &user_id).await?)
            }

            Request::PostJob { draft } => to_data(jobs::post_job(db, require_actor(actor)?, draft).await?),
            Request::GetJob { job_id } => {
                require_actor(actor)?;
                to_data(jobs::get_job(db, &job_id).await?)
            }
            Request::ListOpenJobs => {
                require_actor(actor)?;
                to_data(jobs::list_open_jobs(db).await?)
            }
            Request::ListProposals { job_id } => {
                to_data(jobs::list_proposals(db, require_actor(actor)?, &job_id).await?)
            }
            Request::SubmitProposal { job_id, proposal } => {
                to_data(jobs::submit_proposal(db, require_actor(actor)?, &job_id, proposal).await?)
            }
            Request::DecideProposal { proposal_id, decision } => {
                to_data(jobs::decide_proposal(db, require_actor(actor)?, &proposal_id, decision).await?)
            }
            Request::WithdrawProposal { proposal_id } => {
                jobs::withdraw_proposal(db, require_actor(actor)?, &proposal_id).await?;
                to_data(serde_json::json!({ "withdrawn": proposal_id }))
            }
            Request::CancelJob { job_id } => to_data(jobs::cancel_job(db, require_actor(actor)?, &job_id).await?),

            Request::AdvanceContract { contract_id, action } => {
                to_data(contracts::advance_contract(db, require_actor(actor)?, &contract_id, action).await?)
            }
            Request::LogHours { contract_id, hours } => {
                to_data(contracts::log_hours(db, require_actor(actor)?, &contract_id, hours).await?)
            }
            Request::GetContract { contract_id } => {
                to_data(contracts::get_contract(db, require_actor(actor)?, &contract_id).await?)
            }
            Request::ListContracts => to_data(contracts::list_contracts(db, require_actor(actor)?).await?),

            Request::SendMessage { message } => {
                to_data(messages::send_message(db, require_actor(actor)?, message, config).await?)
            }
            Request::ListConversations => {
                let actor = require_actor(actor)?;
                to_data(conversations::list_conversations(db, &actor.id).await?)
            }
            Request::ListMessages { other_user_id } => {
                let actor = require_actor(actor)?;
                to_data(conversations::list_messages(db, &actor.id, &other_user_id, config).await?)
            }
            Request::MarkRead { other_user_id } => {
                let flipped = messages::mark_conversation_read(db, require_actor(actor)?, &other_user_id).await?;
                to_data(serde_json::json!({ "marked_read": flipped }))
            }

            Request::SuspendUser { user_id, reason, until } => {
                to_data(moderation::suspend_user(db, require_actor(actor)?, &user_id, &reason, until).await?)
            }
            Request::ReinstateUser { user_id } => {
                to_data(moderation::reinstate_user(db, require_actor(actor)?, &user_id).await?)
            }
            Request::ListSuspensions { user_id } => {
                to_data(moderation::list_suspensions(db, require_actor(actor)?, &user_id).await?)
            }
            Request::ChangeRole { user_id, new_role } => {
                to_data(moderation::change_role(db, require_actor(actor)?, &user_id, &new_role).await?)
            }
            Request::DeleteUser { user_id, cascade } => {
                to_data(moderation::delete_user(db, require_actor(actor)?, &user_id, cascade).await?)
            }
            Request::RecomputeStats => to_data(moderation::recompute_stats(db, require_actor(actor)?).await?),
        }
    }
}
