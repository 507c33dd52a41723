//! `gatekeep chat`: one turn streamed to the terminal.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use super::ChatArgs;
use crate::config::EngineConfig;
use crate::error::{GatekeepError, Result};
use crate::models::ModelCatalog;
use crate::render::{Banner, FinalAnswer, NoticeKind, Renderer, SessionHost, ToastLevel, ToolGroup};
use crate::restart::RestartWatcher;
use crate::session::{EngineContext, SessionRunner, SubmitOutcome};
use crate::types::{
    BlockId, BlockKind, PermissionChoice, PermissionRequest, QuestionNegotiation, QueuedMessage,
    ToolInvocation, ToolStatus,
};

/// Negotiation waiting for terminal input.
#[derive(Debug)]
pub enum Prompt {
    Permission(PermissionRequest),
    Question(QuestionNegotiation),
}

/// Prints prose as it streams and forwards negotiations to the prompt loop.
pub struct TerminalRenderer {
    blocks: Mutex<HashMap<BlockId, (BlockKind, usize)>>,
    streamed: AtomicBool,
    prompts: mpsc::UnboundedSender<Prompt>,
}

impl TerminalRenderer {
    pub fn new(prompts: mpsc::UnboundedSender<Prompt>) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            streamed: AtomicBool::new(false),
            prompts,
        }
    }
}

impl Renderer for TerminalRenderer {
    fn notice(&self, kind: NoticeKind, message: &str) {
        eprintln!("\n[{kind}] {message}");
    }

    fn block_opened(&self, id: BlockId, kind: BlockKind) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (kind, 0));
    }

    fn block_text(&self, id: BlockId, text: &str) {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((kind, printed)) = blocks.get_mut(&id) else {
            return;
        };
        if *kind != BlockKind::Prose || text.len() <= *printed || !text.is_char_boundary(*printed) {
            return;
        }
        print!("{}", &text[*printed..]);
        let _ = std::io::stdout().flush();
        *printed = text.len();
        self.streamed.store(true, Ordering::SeqCst);
    }

    fn tool_opened(&self, tool: &ToolInvocation) {
        eprintln!("\n> {} {}", tool.name, tool.input_summary);
    }

    fn tool_resolved(&self, tool: &ToolInvocation) {
        let mark = if tool.status == ToolStatus::ResolvedError {
            "failed"
        } else {
            "ok"
        };
        eprintln!("  {} {mark}", tool.name);
    }

    fn tools_grouped(&self, group: &ToolGroup) {
        eprintln!("  ({})", group.label);
    }

    fn permission_opened(&self, request: &PermissionRequest) {
        let _ = self.prompts.send(Prompt::Permission(request.clone()));
    }

    fn question_opened(&self, negotiation: &QuestionNegotiation) {
        let _ = self.prompts.send(Prompt::Question(negotiation.clone()));
    }

    fn final_answer(&self, answer: &FinalAnswer) {
        if !self.streamed.load(Ordering::SeqCst) && !answer.text.is_empty() {
            print!("{}", answer.text);
        }
        println!();
        match &answer.banner {
            Some(Banner::Success(msg)) => eprintln!("{msg}"),
            Some(Banner::Warning(msg)) => eprintln!("warning: {msg}"),
            Some(Banner::Error(msg)) => eprintln!("error: {msg}"),
            Some(Banner::Cancelled(msg)) => eprintln!("cancelled: {msg}"),
            None => {}
        }
    }
}

impl SessionHost for TerminalRenderer {
    fn toast(&self, level: ToastLevel, message: &str) {
        eprintln!("[{level}] {message}");
    }

    fn reload(&self) {
        eprintln!("agent server restarted");
    }
}

/// Handle `gatekeep chat <prompt>`.
pub async fn handle_chat(config: EngineConfig, args: ChatArgs) -> Result<()> {
    let ctx = EngineContext::from_config(config)?;
    RestartWatcher::new(ctx.clone()).prime().await;

    let last_chat = if args.resume {
        ctx.store.load_prefs()?.last_chat_id
    } else {
        None
    };
    let chat_id = match args.chat.or(last_chat) {
        Some(id) => id,
        None => ctx.service.create_chat().await?,
    };

    let (tx, mut prompts) = mpsc::unbounded_channel();
    let ui = Arc::new(TerminalRenderer::new(tx));
    let session = SessionRunner::open(chat_id, ctx.clone(), ui.clone(), ui);

    let model = match args.model {
        Some(model) => Some(model),
        None => {
            let catalog = ModelCatalog::new(ctx.service.clone(), ctx.store.clone(), ctx.config.model_cache_ttl);
            catalog.resolve_model().await.unwrap_or_else(|err| {
                tracing::warn!(error = %err, "could not resolve model, using server default");
                None
            })
        }
    };
    session.set_model(model);

    let handle = match session.submit(QueuedMessage::new(args.prompt))? {
        SubmitOutcome::Started { handle, .. } => handle,
        SubmitOutcome::Queued { position } => {
            return Err(GatekeepError::InvalidState(format!(
                "chat is busy, message queued at position {position}"
            )))
        }
    };
    tokio::pin!(handle);

    let outcome = loop {
        tokio::select! {
            joined = &mut handle => {
                break joined.map_err(|err| GatekeepError::InvalidState(format!("turn task failed: {err}")))?;
            }
            Some(prompt) = prompts.recv() => answer(&session, prompt, args.yes).await?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\ncancelling...");
                session.cancel().await?;
            }
        }
    };
    tracing::debug!(%outcome, "turn finished");
    session.close();
    Ok(())
}

async fn answer(session: &SessionRunner, prompt: Prompt, auto_approve: bool) -> Result<()> {
    match prompt {
        Prompt::Permission(request) => {
            let choice = if auto_approve {
                PermissionChoice::AllowOnce
            } else {
                ask_permission(&request).await?
            };
            session.decide(&request.request_id, choice).await
        }
        Prompt::Question(negotiation) => {
            for (index, question) in negotiation.questions.iter().enumerate() {
                let mut text = format!("\n? {}\n", question.text);
                for (n, option) in question.options.iter().enumerate() {
                    text.push_str(&format!("  {}. {}\n", n + 1, option.label));
                }
                text.push_str("> ");
                let reply = read_line(text).await?;
                match reply.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= question.options.len() => {
                        session.select_option(&negotiation.request_id, index, n - 1).await?;
                    }
                    _ => {
                        session
                            .set_free_text(&negotiation.request_id, index, &reply)
                            .await?;
                    }
                }
            }
            match session.submit_answers(&negotiation.request_id).await {
                Ok(()) | Err(GatekeepError::AlreadyResolved(_)) => Ok(()),
                Err(err) => Err(err),
            }
        }
    }
}

async fn ask_permission(request: &PermissionRequest) -> Result<PermissionChoice> {
    let mut text = format!("\n! {} wants to run", request.tool);
    if let Some(description) = &request.description {
        text.push_str(&format!(": {description}"));
    }
    if let Some(path) = &request.path {
        text.push_str(&format!(" ({path})"));
    }
    let always = request.always_allow_pattern.is_some();
    text.push_str(if always {
        "\n  [y]es / [n]o / [a]lways > "
    } else {
        "\n  [y]es / [n]o > "
    });
    let reply = read_line(text).await?;
    Ok(match reply.to_ascii_lowercase().as_str() {
        "y" | "yes" => PermissionChoice::AllowOnce,
        "a" | "always" if always => PermissionChoice::AlwaysAllow,
        _ => PermissionChoice::Deny,
    })
}

async fn read_line(prompt: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        eprint!("{prompt}");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|err| GatekeepError::InvalidState(format!("stdin reader failed: {err}")))?
}
