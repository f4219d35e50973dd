mod commands;
mod render;

use std::sync::Arc;

use sqlpad_adapters::mysql::{MysqlPools, MysqlQueryEngine, MysqlSchemaProvider};
use sqlpad_core::config;
use sqlpad_core::execution::{ExecutionOutcome, ExecutionRequestError};
use sqlpad_core::history::FileQueryHistory;
use sqlpad_core::notifications::Notification;
use sqlpad_core::query_result::QueryEngine;
use sqlpad_core::schema::SchemaProvider;
use sqlpad_core::session::{ConnectionSwitch, WorkbenchSession};
use sqlpad_core::tabs::TabId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{parse_line, Command, HELP};
use crate::render::{render_notification, render_prompt, render_result, render_tab, render_tabs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let (config_path, config) = config::load_default()?;
    let Some(first_connection) = config.connections.first() else {
        return Err(format!(
            "no [[connections]] configured in {}",
            config_path.display()
        )
        .into());
    };
    info!(
        config = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        connections = config.connections.len(),
        "starting sqlpad"
    );

    let pools = MysqlPools::from_config(&config);
    let engine = MysqlQueryEngine::new(pools.clone(), config.workbench.max_execution_time_ms);
    let provider = MysqlSchemaProvider::new(pools.clone());
    let (sender, mut notifications) = mpsc::unbounded_channel::<Notification>();

    let mut session = WorkbenchSession::new(engine, provider, &config.workbench, first_connection.id)
        .with_notifier(Arc::new(sender));
    if config.workbench.record_history {
        match FileQueryHistory::load_default() {
            Ok(history) => {
                info!(path = %history.path().display(), "recording query history");
                session = session.with_history(Arc::new(history));
            }
            Err(error) => warn!(%error, "query history disabled"),
        }
    }
    session.start_autosave();
    session.open_query_tab();

    println!(
        "sqlpad connected to {}. Type SQL, then :run. :help lists commands.",
        session.connection_name().await
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let flow = match parse_line(&line) {
            Ok(command) => apply(&mut session, command).await,
            Err(error) => {
                println!("{error}");
                Flow::Continue
            }
        };
        print_notifications(&mut notifications);
        if flow == Flow::Quit {
            break;
        }
    }

    let saved = session.shutdown();
    print_notifications(&mut notifications);
    info!(saved = saved.len(), "drafts saved on exit");
    pools.disconnect().await?;
    Ok(())
}

fn print_notifications(notifications: &mut UnboundedReceiver<Notification>) {
    while let Ok(notification) = notifications.try_recv() {
        println!("{}", render_notification(&notification));
    }
}

async fn apply<E: QueryEngine, P: SchemaProvider>(
    session: &mut WorkbenchSession<E, P>,
    command: Command,
) -> Flow {
    match command {
        Command::Append(line) => {
            let Some(tab_id) = active_tab(session) else {
                return Flow::Continue;
            };
            session.registry().update(|registry| {
                let draft = registry
                    .tab(tab_id)
                    .map(|tab| tab.draft_query().to_string())
                    .unwrap_or_default();
                let query = if draft.is_empty() {
                    line
                } else {
                    format!("{draft}\n{line}")
                };
                registry.update_tab_query(tab_id, &query);
            });
        }
        Command::NewTab => {
            session.open_query_tab();
            print_active(session);
        }
        Command::OpenTable(table) => {
            session.open_table_tab(&table).await;
            print_active(session);
        }
        Command::ListTabs => print!("{}", render_tabs(&session.registry().snapshot())),
        Command::UseTab(position) => match tab_at(session, position) {
            Some(tab_id) => {
                session
                    .registry()
                    .update(|registry| registry.set_active_tab(tab_id));
                print_active(session);
            }
            None => println!("no tab {position}"),
        },
        Command::CloseTab(position) => {
            let target = match position {
                Some(position) => tab_at(session, position),
                None => session.registry().snapshot().active_tab_id(),
            };
            match target {
                Some(tab_id) => {
                    session.close_tab(tab_id);
                    print!("{}", render_tabs(&session.registry().snapshot()));
                }
                None => println!("no such tab"),
            }
        }
        Command::CloseAll => session.close_all_tabs(),
        Command::Duplicate => {
            if let Some(tab_id) = active_tab(session) {
                session
                    .registry()
                    .update(|registry| registry.duplicate_tab(tab_id));
                print!("{}", render_tabs(&session.registry().snapshot()));
            }
        }
        Command::Rename(name) => {
            if let Some(tab_id) = active_tab(session) {
                session
                    .registry()
                    .update(|registry| registry.update_tab_name(tab_id, &name));
            }
        }
        Command::Run => {
            if let Some(tab_id) = active_tab(session) {
                let outcome = session.coordinator().execute(tab_id).await;
                report(outcome);
            }
        }
        Command::Rerun => {
            if let Some(tab_id) = active_tab(session) {
                report(session.coordinator().rerun(tab_id).await);
            }
        }
        Command::SetConfirmation { kind, checked } => {
            if let Some(tab_id) = active_tab(session) {
                match session.coordinator().set_confirmation(tab_id, kind, checked) {
                    Ok(prompt) => print!("{}", render_prompt(&prompt)),
                    Err(error) => println!("{error}"),
                }
            }
        }
        Command::Proceed => {
            if let Some(tab_id) = active_tab(session) {
                report(session.coordinator().proceed(tab_id).await);
            }
        }
        Command::Cancel => {
            if let Some(tab_id) = active_tab(session) {
                if !session.coordinator().cancel_confirmation(tab_id) {
                    println!("nothing is awaiting confirmation");
                }
            }
        }
        Command::Page(request) => {
            if let Some(tab_id) = active_tab(session) {
                report(session.coordinator().fetch_page(tab_id, request).await);
            }
        }
        Command::Connect(connection_id) => {
            match session.request_connection_switch(connection_id).await {
                Ok(ConnectionSwitch::Unchanged) => println!("already using that connection"),
                Ok(ConnectionSwitch::Switched) => {
                    session.open_query_tab();
                }
                Ok(ConnectionSwitch::ConfirmationRequired { unsaved_tabs }) => println!(
                    "{} tab(s) have unsaved changes and will be closed. :yes to switch, :no to stay",
                    unsaved_tabs.len()
                ),
                Err(error) => println!("{error}"),
            }
        }
        Command::ConfirmSwitch => {
            if session.confirm_connection_switch().await == ConnectionSwitch::Switched {
                session.open_query_tab();
            } else {
                println!("no connection switch is pending");
            }
        }
        Command::DeclineSwitch => {
            if !session.decline_connection_switch() {
                println!("no connection switch is pending");
            }
        }
        Command::Save => {
            let saved = session
                .registry()
                .update(|registry| registry.save_drafts());
            println!("saved {} draft(s)", saved.len());
        }
        Command::Show => print_active(session),
        Command::Clear => {
            if let Some(tab_id) = active_tab(session) {
                session
                    .registry()
                    .update(|registry| registry.update_tab_query(tab_id, ""));
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

fn active_tab<E: QueryEngine, P: SchemaProvider>(
    session: &WorkbenchSession<E, P>,
) -> Option<TabId> {
    let active = session.registry().snapshot().active_tab_id();
    if active.is_none() {
        println!("no open tab, use :new or :table <name>");
    }
    active
}

fn tab_at<E: QueryEngine, P: SchemaProvider>(
    session: &WorkbenchSession<E, P>,
    position: usize,
) -> Option<TabId> {
    session
        .registry()
        .snapshot()
        .tabs()
        .get(position - 1)
        .map(sqlpad_core::tabs::Tab::id)
}

fn print_active<E: QueryEngine, P: SchemaProvider>(session: &WorkbenchSession<E, P>) {
    match session.registry().snapshot().active_tab() {
        Some(tab) => print!("{}", render_tab(tab)),
        None => println!("no open tabs"),
    }
}

fn report(outcome: Result<ExecutionOutcome, ExecutionRequestError>) {
    match outcome {
        Ok(ExecutionOutcome::Completed(result)) => print!("{}", render_result(&result)),
        Ok(ExecutionOutcome::Failed { message }) => println!("error: {message}"),
        Ok(ExecutionOutcome::AwaitingConfirmation(prompt)) => print!("{}", render_prompt(&prompt)),
        Ok(ExecutionOutcome::Discarded) => println!("tab closed before the query settled"),
        Err(error) => println!("{error}"),
    }
}
