use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use tally::config::{API_KEY_ENV, APP_NAME, USER_ENV};
use tally::interpreter::{DashboardContext, HybridInterpreter};
use tally::models::{ActionAuditEntry, ConversationSummary, Invoice, InvoiceStatus, ProviderId};
use tally::providers::ProviderRouter;
use tally::services::settings::ModelSettings;
use tally::services::{
    AppSettings, Assistant, CredentialStore, Database, SettingsService, TurnOutcome,
};

const HELP: &str = "Ask about invoices in plain language, e.g. \"overdue invoices from Acme\".
Commands:
  /confirm         apply the pending change
  /cancel          discard the pending change
  /select [ID]     treat ID as the selected invoice (no ID clears it)
  /new             start a new conversation
  /history         list your conversations
  /audit [ID]      show the audit trail for an invoice, or for this conversation
  /model PROVIDER MODEL [BASE_URL]
                   use a language model (claude or local) from the next start
  /key [SECRET]    store the Claude API key in the keyring (no SECRET forgets it)
  /help            show this help
  /quit            exit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let db = Database::new().await?;
    let owner = owner_id();
    if db.count_invoices(&owner).await? == 0 {
        seed_demo_invoices(&db, &owner).await?;
        tracing::info!(owner = %owner, "Seeded demo invoices");
    }

    let settings = SettingsService::load(&db).await;
    let api_key = api_key(&settings).await;
    let interpreter = HybridInterpreter::from_settings(
        &settings,
        Arc::new(ProviderRouter::with_builtin()),
        api_key,
    );
    let semantic = interpreter.has_semantic();
    let assistant = Assistant::new(
        db.clone(),
        Arc::new(db.clone()),
        Arc::new(interpreter),
        &settings,
    );

    let mut conversation = assistant.start_conversation(&owner, None).await?;
    let mut dashboard = DashboardContext::default();
    // Message id of the last confirmation prompt printed, if it is still open.
    let mut shown_prompt: Option<String> = None;

    let mut out = tokio::io::stdout();
    out.write_all(
        format!(
            "{} ({} interpreter). Type /help for commands.\n",
            APP_NAME,
            if semantic { "language model" } else { "rule-based" }
        )
        .as_bytes(),
    )
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        out.write_all(b"> ").await?;
        out.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };
        let text = match command {
            "/quit" | "/exit" => break,
            "/help" => HELP.to_string(),
            "/new" => {
                conversation = assistant.start_conversation(&owner, None).await?;
                dashboard = DashboardContext::default();
                shown_prompt = None;
                "Started a new conversation.".to_string()
            }
            "/select" => {
                dashboard.selected_record_ids = if arg.is_empty() {
                    Vec::new()
                } else {
                    vec![arg.to_uppercase()]
                };
                match dashboard.single_selection() {
                    Some(id) => format!("Selected {}.", id),
                    None => "Selection cleared.".to_string(),
                }
            }
            "/confirm" => match shown_prompt.take() {
                Some(message_id) => {
                    match assistant.confirm(&owner, &conversation.id, &message_id).await {
                        Ok(outcome) => describe(&outcome),
                        Err(e) => e.user_message(),
                    }
                }
                None => "There is nothing waiting for confirmation.".to_string(),
            },
            "/cancel" => {
                shown_prompt = None;
                match assistant.cancel(&owner, &conversation.id).await {
                    Ok(outcome) => describe(&outcome),
                    Err(e) => e.user_message(),
                }
            }
            "/history" => match assistant.list_conversations(&owner).await {
                Ok(summaries) => describe_history(&summaries, &conversation.id),
                Err(e) => e.user_message(),
            },
            "/audit" => {
                let entries = if arg.is_empty() {
                    assistant.conversation_audit(&owner, &conversation.id).await
                } else {
                    assistant.audit_history(&owner, arg).await
                };
                match entries {
                    Ok(entries) => describe_audit(&entries),
                    Err(e) => e.user_message(),
                }
            }
            "/model" => match configure_model(&db, arg).await {
                Ok(text) => text,
                Err(e) => format!("Could not save settings: {:#}", e),
            },
            "/key" => match store_key(arg).await {
                Ok(text) => text,
                Err(e) => format!("Keyring error: {:#}", e),
            },
            _ if command.starts_with('/') => format!("Unknown command {}. Try /help.", command),
            _ => {
                let selection = (!dashboard.selected_record_ids.is_empty()).then_some(&dashboard);
                // Sending abandons whatever was pending.
                shown_prompt = None;
                match assistant.send(&owner, &conversation.id, line, selection).await {
                    Ok(outcome) => {
                        shown_prompt = outcome.proposal.as_ref().map(|p| p.message_id.clone());
                        describe(&outcome)
                    }
                    Err(e) => e.user_message(),
                }
            }
        };
        out.write_all(format!("{}\n", text).as_bytes()).await?;
    }
    Ok(())
}

fn describe(outcome: &TurnOutcome) -> String {
    let mut text = outcome.reply.content.clone();
    if outcome.proposal.is_some() {
        text.push_str("\n(/confirm or /cancel)");
    }
    text
}

fn describe_history(summaries: &[ConversationSummary], current_id: &str) -> String {
    if summaries.is_empty() {
        return "No conversations yet.".to_string();
    }
    summaries
        .iter()
        .map(|s| {
            format!(
                "{} {}  {}  ({} messages)",
                if s.conversation.id == current_id { "*" } else { " " },
                s.conversation.updated_at.format("%Y-%m-%d %H:%M"),
                s.conversation.title.as_deref().unwrap_or("(untitled)"),
                s.message_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_audit(entries: &[ActionAuditEntry]) -> String {
    if entries.is_empty() {
        return "No recorded changes.".to_string();
    }
    entries
        .iter()
        .map(|e| {
            format!(
                "{}  {}  {}  {} → {}  {}{}",
                e.created_at.format("%Y-%m-%d %H:%M:%S"),
                e.record_ids.join(","),
                e.action_type.as_str(),
                e.before_value.as_deref().unwrap_or("-"),
                e.after_value.as_deref().unwrap_or("-"),
                e.outcome.as_str(),
                if e.unchanged { " (unchanged)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn configure_model(db: &Database, arg: &str) -> Result<String> {
    let mut parts = arg.split_whitespace();
    let (Some(provider), Some(model)) = (parts.next(), parts.next()) else {
        return Ok("Usage: /model claude|local MODEL [BASE_URL]".to_string());
    };
    let Some(provider) = ProviderId::from_str(provider) else {
        return Ok(format!("Unknown provider {}; use claude or local.", provider));
    };
    let base_url = parts.next().map(str::to_string);
    if provider == ProviderId::Local && base_url.is_none() {
        return Ok("A local model needs a base URL, e.g. http://localhost:11434".to_string());
    }

    let mut settings = SettingsService::load(db).await;
    settings.model = Some(ModelSettings {
        provider,
        model: model.to_string(),
        base_url,
        temperature: Some(0.0),
    });
    SettingsService::save(db, &settings).await?;
    Ok(format!(
        "Saved. {} ({}) will be used from the next start.",
        model,
        provider.display_name()
    ))
}

async fn store_key(secret: &str) -> Result<String> {
    let store = CredentialStore::new().await?;
    if secret.is_empty() {
        store.forget_api_key(ProviderId::Claude).await?;
        return Ok("Removed the stored API key.".to_string());
    }
    store.store_api_key(ProviderId::Claude, secret).await?;
    Ok("Stored the API key in the keyring.".to_string())
}

fn owner_id() -> String {
    std::env::var(USER_ENV)
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "local".to_string())
}

async fn api_key(settings: &AppSettings) -> Option<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        return Some(key);
    }
    let provider = settings.model.as_ref().map(|m| m.provider)?;
    if provider != ProviderId::Claude {
        return None;
    }
    let store = match CredentialStore::new().await {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("Keyring unavailable: {:#}", e);
            return None;
        }
    };
    match store.api_key(provider).await {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!("Failed to read API key: {:#}", e);
            None
        }
    }
}

async fn seed_demo_invoices(db: &Database, owner: &str) -> Result<()> {
    let today = Utc::now().date_naive();
    let demo = [
        ("INV-1001", "Acme Corp", 120_000, InvoiceStatus::Pending, 3),
        ("INV-1002", "Globex", 48_250, InvoiceStatus::InReview, 9),
        ("INV-1003", "Initech", 9_900, InvoiceStatus::Approved, 14),
        ("INV-1004", "Acme Corp", 310_000, InvoiceStatus::Overdue, 45),
        ("INV-1005", "Umbrella", 72_500, InvoiceStatus::Paid, 60),
        ("INV-1006", "Globex", 15_000, InvoiceStatus::Approved, 21),
        ("INV-1007", "Hooli", 205_000, InvoiceStatus::Pending, 1),
    ];
    for (id, vendor, amount_cents, status, age_days) in demo {
        let issue_date: NaiveDate = today - Duration::days(age_days);
        db.upsert_invoice(&Invoice {
            id: id.to_string(),
            owner_id: owner.to_string(),
            vendor: vendor.to_string(),
            amount_cents,
            status,
            issue_date,
            due_date: issue_date + Duration::days(30),
            notes: Vec::new(),
            updated_at: Utc::now(),
        })
        .await
        .with_context(|| format!("Failed to seed {}", id))?;
    }
    Ok(())
}
