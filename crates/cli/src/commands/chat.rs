//! `concierge chat`: Interactive or single-message conversation.

use concierge_agent::{AgentLoop, Session, TurnError};
use concierge_config::AppConfig;
use concierge_core::event::{AssistantEvent, EventBus, EventKind, Subscription};
use concierge_providers::build_from_config;
use concierge_tools::{ReminderScheduler, ReminderStore, default_registry};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

pub async fn run(message: Option<String>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions when no key is configured
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for '{}'!", config.default_provider);
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CONCIERGE_API_KEY = 'sk-...'   (generic)");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'   (for OpenAI direct)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = build_from_config(&config);
    let gateway = router.default().ok_or("No default provider configured")?;

    let store = ReminderStore::new();
    let registry = Arc::new(default_registry(&config, store.clone())?);
    let function_names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();

    let bus = EventBus::default();
    let shutdown = CancellationToken::new();

    let scheduler = config.reminders.enabled.then(|| {
        ReminderScheduler::new(
            store,
            bus.clone(),
            Duration::from_secs(config.reminders.check_interval_secs),
        )
        .spawn(shutdown.clone())
    });
    let announcer = bus.spawn_listener(&[EventKind::ReminderTriggered], |event| async move {
        if let AssistantEvent::ReminderTriggered { title, description, due_at, .. } = event.as_ref() {
            println!();
            println!("  ⏰ Reminder: {title} ({})", due_at.with_timezone(&chrono::Local).format("%H:%M"));
            if let Some(description) = description {
                println!("     {description}");
            }
        }
    });

    let mut answers = bus.subscribe_to(&output_kinds(verbose));
    let agent = AgentLoop::from_config(gateway, registry, bus.clone(), &config.orchestration);
    let mut session = Session::from_config(&config);

    if let Some(msg) = message {
        // Single message mode
        let result = agent.process(&mut session, msg).await;
        print_events(&mut answers);
        result?;
    } else {
        // Interactive mode
        println!();
        println!("  ╔══════════════════════════════════════════════╗");
        println!("  ║         Concierge - Interactive Mode         ║");
        println!("  ╚══════════════════════════════════════════════╝");
        println!();
        println!("  Provider:  {}", agent.gateway_name());
        println!("  Model:     {}", config.model_for(&config.default_provider));
        println!("  Functions: {}", function_names.join(", "));
        println!();
        println!("  Type your message and press Enter.");
        println!("  Type 'reset' to start over, 'exit' or Ctrl+D to quit.");
        println!("  Ctrl+C interrupts the current request.");
        println!();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("  You > ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => break,
                "reset" => {
                    session.reset();
                    println!("  (conversation cleared)");
                    continue;
                }
                _ => {}
            }

            let turn_cancel = CancellationToken::new();
            let result = tokio::select! {
                result = agent.process_with(&mut session, line, &turn_cancel) => result,
                _ = tokio::signal::ctrl_c() => {
                    turn_cancel.cancel();
                    Err(TurnError::Cancelled)
                }
            };

            print_events(&mut answers);
            match result {
                Ok(_) => {}
                Err(TurnError::Cancelled) => eprintln!("  [Interrupted]"),
                Err(e) => eprintln!("  [Error] {e}"),
            }
            println!();
        }

        println!();
        println!("  Goodbye!");
        println!();
    }

    shutdown.cancel();
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    announcer.abort();
    Ok(())
}

fn output_kinds(verbose: bool) -> Vec<EventKind> {
    let mut kinds = vec![EventKind::FinalAnswer, EventKind::LoopLimitExceeded];
    if verbose {
        kinds.extend([
            EventKind::FunctionCallStarted,
            EventKind::FunctionCallCompleted,
            EventKind::FunctionCallFailed,
        ]);
    }
    kinds
}

fn print_events(subscription: &mut Subscription) {
    while let Some(event) = subscription.try_recv() {
        match event.as_ref() {
            AssistantEvent::FunctionCallStarted { name, args, .. } => {
                println!("  → {name}({args})");
            }
            AssistantEvent::FunctionCallCompleted { name, result, .. } => {
                println!("  ✓ {name}: {result}");
            }
            AssistantEvent::FunctionCallFailed { name, error, .. } => {
                println!("  ✗ {name}: {error}");
            }
            AssistantEvent::FinalAnswer { text } | AssistantEvent::LoopLimitExceeded { partial_text: text } => {
                println!();
                for line in text.lines() {
                    println!("  Concierge > {line}");
                }
            }
            _ => {}
        }
    }
}
