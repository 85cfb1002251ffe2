use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use reading_assist::assistant::{AssistantDeps, ReadingAssistant};
use reading_assist::bus::{MessageBus, MessageType, PageContent};
use reading_assist::config::Settings;
use reading_assist::llm::ChatStatus;
use reading_assist::skills::builtin::{analyze_readability, text_stats};
use reading_assist::store::{FileStorage, Storage};

type CurrentPage = Arc<Mutex<Option<PageContent>>>;

/// Split `<url> <title> :: <content>`. The title defaults to the URL.
fn parse_visit(args: &str) -> Option<PageContent> {
    let (head, content) = args.split_once("::")?;
    let head = head.trim();
    let (url, title) = match head.split_once(char::is_whitespace) {
        Some((url, title)) => (url, title.trim()),
        None => (head, head),
    };
    if url.is_empty() {
        return None;
    }
    Some(PageContent {
        url: url.to_string(),
        title: title.to_string(),
        content: content.trim().to_string(),
    })
}

/// Serve the host side of the bus from the page set with `/visit`.
fn serve_page(bus: &MessageBus, current: &CurrentPage) {
    let page = Arc::clone(current);
    let _content = bus.on_message(MessageType::GetPageContent, move |_| {
        let page = page.lock().unwrap_or_else(|p| p.into_inner()).clone();
        async move { page.map(|p| json!(p)) }
    });

    let page = Arc::clone(current);
    let _tab = bus.on_message(MessageType::GetTabInfo, move |_| {
        let page = page.lock().unwrap_or_else(|p| p.into_inner()).clone();
        async move { page.map(|p| json!({"url": p.url, "title": p.title})) }
    });

    let page = Arc::clone(current);
    let _stats = bus.on_message(MessageType::GetPageStats, move |_| {
        let page = page.lock().unwrap_or_else(|p| p.into_inner()).clone();
        async move {
            page.map(|p| {
                json!({
                    "url": p.url,
                    "stats": text_stats(&p.content),
                    "readability": analyze_readability(&p.content),
                })
            })
        }
    });
}

async fn handle_command(
    assistant: &ReadingAssistant,
    current: &CurrentPage,
    line: &str,
) -> anyhow::Result<()> {
    let (command, args) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/visit" => {
            let Some(page) = parse_visit(args) else {
                eprintln!("usage: /visit <url> <title> :: <content>");
                return Ok(());
            };
            *current.lock().unwrap_or_else(|p| p.into_inner()) = Some(page);
            match assistant.record_visit().await? {
                Some(page) => eprintln!("Recorded {} ({})", page.title, page.url),
                None => eprintln!("Page has no content; not recorded"),
            }
        }
        "/memory" => {
            let pages = assistant.memory().get_memory().await;
            if pages.is_empty() {
                eprintln!("(no remembered pages)");
            }
            for page in pages {
                eprintln!("  {} ({})", page.title, page.url);
            }
        }
        "/clear" => {
            assistant.clear_history().await?;
            assistant.memory().clear_memory().await;
            eprintln!("Cleared chat history and page memory");
        }
        "/skills" => {
            for skill in assistant.skills().get_all().await {
                let state = if skill.enabled { "on " } else { "off" };
                eprintln!("  [{}] {} - {}", state, skill.name, skill.description);
            }
        }
        "/connect" => {
            let url = args.trim();
            if url.is_empty() {
                eprintln!("usage: /connect <url>");
                return Ok(());
            }
            let source = assistant.connect_remote_source(url).await?;
            eprintln!("Connected {} ({} tools)", source.url, source.tools.len());
        }
        "/test" => eprintln!("{:?}", assistant.test_connection().await),
        other => eprintln!("Unknown command: {}", other),
    }
    Ok(())
}

async fn ask(assistant: &ReadingAssistant, current: &CurrentPage, question: &str) -> anyhow::Result<()> {
    let current_url = current
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .as_ref()
        .map(|p| p.url.clone())
        .unwrap_or_default();

    let mut printed = 0;
    let outcome = assistant
        .ask(question, &current_url, None, |text| {
            let mut out = std::io::stdout();
            let _ = out.write_all(text[printed..].as_bytes());
            let _ = out.flush();
            printed = text.len();
        })
        .await?;

    match outcome.status {
        ChatStatus::Completed => println!("\n"),
        ChatStatus::Failed(reason) => eprintln!("\n[failed] {}\n", reason),
        ChatStatus::Cancelled => eprintln!("\n[cancelled]\n"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_path =
        std::env::var("READING_ASSIST_DATA").unwrap_or_else(|_| "./data/storage.json".to_string());
    let storage = Storage::new(Arc::new(FileStorage::new(&data_path)));

    let mut settings = Settings::load(&storage).await;
    settings.apply_env().context("invalid READING_ASSIST_* environment")?;
    settings
        .save(&storage)
        .await
        .with_context(|| format!("failed to write settings to {}", data_path))?;

    let bus = Arc::new(MessageBus::new());
    let current: CurrentPage = Arc::new(Mutex::new(None));
    serve_page(&bus, &current);

    let assistant = ReadingAssistant::new(AssistantDeps::new(storage, bus));
    assistant.restore_remote_sources().await;

    let orchestrator = Arc::clone(assistant.orchestrator());
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            orchestrator.cancel_active();
        }
    });

    eprintln!("📖 Reading Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Provider: {:?}  Model: {}", settings.provider, settings.effective_model());
    eprintln!("   Data: {}", data_path);
    eprintln!("   Commands: /visit <url> <title> :: <content>, /memory, /clear, /skills, /connect <url>, /test, /quit");
    eprintln!("   Ctrl-C cancels a running answer.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" || line == "/exit" {
            break;
        }
        if line.starts_with('/') {
            if let Err(e) = handle_command(&assistant, &current, line).await {
                eprintln!("Error: {:#}", e);
            }
        } else if !line.is_empty() {
            if let Err(e) = ask(&assistant, &current, line).await {
                eprintln!("Error: {:#}", e);
            }
        }
        eprint!("> ");
    }

    Ok(())
}
