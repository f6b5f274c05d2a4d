use std::path::Path;

use artisan_market::client::config::ClientConfig;
use artisan_market::client::models::{Merge, Presentation};
use artisan_market::client::services::{ChatEvent, ChatService};
use artisan_market::common::error::ClientError;
use artisan_market::common::models::{Artisan, Asking, Category, Message, Role};
use artisan_market::utils::time::format_timestamp;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

const HELP: &str = "\
Comandi:
  /login <email> <password>     /logout          /me
  /artisans                     /categories      /askings
  /category_add <name>          (admin)
  /artisan_delete <id>          (admin)
  /conversations [page]         /open <userId>   /close
  /send <text>                  /attach <path> [text]
  /unread                       /geocode <address>
  /avatar <path>                /help            /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ClientConfig::from_env()?;
    let mut service = ChatService::new(config)?;
    let mut events: Option<UnboundedReceiver<ChatEvent>> = None;

    println!("[CLIENT] Benvenuto! Digita /help per la lista dei comandi.");
    match service.restore_session().await {
        Ok(Some(user)) => {
            println!("[CLIENT] Sessione ripristinata per {}", user.display_name());
            events = start_realtime(&mut service).await;
        }
        Ok(None) => println!("[CLIENT] Effettua il login con /login <email> <password>"),
        Err(e) => println!("[CLIENT][ERROR] {}", e.user_message()),
    }

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let cmd = line.trim();
                if cmd.is_empty() {
                    continue;
                }
                match run_command(&mut service, &mut events, cmd).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => report(&mut service, e).await,
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Some(ChatEvent::Message(message)) => {
                        let to_me = service.current_user().is_some_and(|u| u.id == message.receiver_id);
                        let merge = service.handle_event(ChatEvent::Message(message.clone())).await;
                        match Merge::presentation(merge, to_me) {
                            Presentation::Show => print_message(&service, &message),
                            Presentation::Confirm => {
                                println!("[CLIENT] Messaggio #{} consegnato", message.id.unwrap_or_default());
                            }
                            Presentation::Notify => {
                                println!("[CLIENT] Nuovo messaggio da {} ({} non letti)",
                                    message.sender_id, service.unread_total().await);
                            }
                            Presentation::Silent => {}
                        }
                    }
                    Some(other) => {
                        let lost = matches!(other, ChatEvent::Disconnected);
                        service.handle_event(other).await;
                        if lost {
                            println!("[CLIENT] Connessione in tempo reale persa, i messaggi vanno reinviati");
                            events = None;
                        }
                    }
                    None => events = None,
                }
            }
        }
    }

    println!("[CLIENT] Disconnessione e uscita.");
    service.reset().await;
    Ok(())
}

async fn next_event(events: &mut Option<UnboundedReceiver<ChatEvent>>) -> Option<ChatEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn start_realtime(service: &mut ChatService) -> Option<UnboundedReceiver<ChatEvent>> {
    if let Err(e) = service.connect_realtime().await {
        println!("[CLIENT][ERROR] Chat in tempo reale non disponibile: {}", e.user_message());
    }
    if let Err(e) = service.start_unread_polling() {
        println!("[CLIENT][ERROR] {}", e.user_message());
    }
    service.take_events()
}

async fn report(service: &mut ChatService, e: ClientError) {
    println!("[CLIENT][ERROR] {}", e.user_message());
    if e.requires_login() {
        service.reset().await;
        println!("[CLIENT] Effettua di nuovo il login con /login <email> <password>");
    }
}

fn print_message(service: &ChatService, message: &Message) {
    let who = match service.current_user() {
        Some(user) if user.id == message.sender_id => "tu".to_string(),
        _ => message.sender_id.to_string(),
    };
    let marker = if message.is_pending() { " (invio...)" } else { "" };
    println!("[{}] {}: {}{}", format_timestamp(&message.timestamp), who, message.content, marker);
    for attachment in &message.attachments {
        println!("        allegato: {}", attachment.file_url);
    }
}

/// Returns `Ok(false)` when the user asked to quit.
async fn run_command(
    service: &mut ChatService,
    events: &mut Option<UnboundedReceiver<ChatEvent>>,
    cmd: &str,
) -> Result<bool, ClientError> {
    let mut parts = cmd.split_whitespace();
    let command = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    match command {
        "/help" => println!("{}", HELP),
        "/quit" => return Ok(false),
        "/login" if args.len() == 2 => {
            service.reset().await;
            let user = service.login(args[0], args[1]).await?;
            println!("[CLIENT] Login effettuato come {} ({:?})", user.display_name(), user.role);
            *events = start_realtime(service).await;
        }
        "/logout" => {
            *events = None;
            service.logout().await?;
            println!("[CLIENT] Logout effettuato.");
        }
        "/me" => {
            let user = service.api().me().await?;
            println!("[CLIENT] {} <{}> {:?}", user.display_name(), user.email, user.role);
        }
        "/artisans" => {
            for a in service.api().list::<Artisan>().await? {
                let state = if a.enabled { "" } else { " [sospeso]" };
                println!("  #{} {} {} - {}{}", a.id.unwrap_or_default(), a.first_name, a.last_name,
                    a.city.as_deref().unwrap_or("-"), state);
            }
        }
        "/categories" => {
            for c in service.api().list::<Category>().await? {
                println!("  #{} {}", c.id.unwrap_or_default(), c.name);
            }
        }
        "/askings" => {
            for a in service.api().list::<Asking>().await? {
                println!("  #{} {} ({})", a.id.unwrap_or_default(), a.title, a.city.as_deref().unwrap_or("-"));
            }
        }
        "/category_add" if !args.is_empty() => {
            service.current_user().ok_or(ClientError::NotLoggedIn)?.require_role(Role::Admin)?;
            let category = Category { id: None, name: args.join(" "), description: None };
            let created = service.api().create(&category).await?;
            println!("[CLIENT] Categoria #{} creata", created.id.unwrap_or_default());
        }
        "/artisan_delete" if args.len() == 1 => {
            service.current_user().ok_or(ClientError::NotLoggedIn)?.require_role(Role::Admin)?;
            let id = parse_id(args[0])?;
            service.api().delete::<Artisan>(id).await?;
            println!("[CLIENT] Artigiano #{} eliminato", id);
        }
        "/conversations" => {
            let page = args.first().and_then(|p| p.parse().ok()).unwrap_or(0);
            let result = service.conversations(page, 10).await?;
            for c in &result.content {
                let when = c.last_message_time.as_ref().map(format_timestamp).unwrap_or_default();
                println!("  #{} {} [{}] {}", c.other_user_id, c.other_user_name, when,
                    c.last_message.as_deref().unwrap_or(""));
            }
            if result.has_next() {
                println!("  ... /conversations {} per la pagina successiva", page + 1);
            }
        }
        "/open" if args.len() == 1 => {
            let peer = parse_id(args[0])?;
            let conversation = service.open_conversation(peer).await?;
            let lines: Vec<Message> = conversation.ordered().into_iter().cloned().collect();
            for message in &lines {
                print_message(service, message);
            }
        }
        "/close" => service.close_conversation().await,
        "/send" if !args.is_empty() => {
            let text = cmd.splitn(2, ' ').nth(1).unwrap_or("").trim();
            service.send_text(text)?;
            if let Some(last) = service.conversation().and_then(|c| c.pending().last()) {
                print_message(service, last);
            }
        }
        "/attach" if !args.is_empty() => {
            let text = args[1..].join(" ");
            let message = service.send_with_attachment(Path::new(args[0]), &text).await?;
            print_message(service, &message);
        }
        "/unread" => {
            let total = service.refresh_unread().await?;
            println!("[CLIENT] {} messaggi non letti", total);
            for (sender, count) in service.unread_by_sender().await {
                println!("  da #{}: {}", sender, count);
            }
        }
        "/geocode" if !args.is_empty() => {
            let place = service.api().geocode(&args.join(" ")).await?;
            println!("[CLIENT] {:.5}, {:.5} {}", place.lat, place.lon, place.display_name.unwrap_or_default());
        }
        "/avatar" if args.len() == 1 => {
            let upload = service.api().upload_avatar(Path::new(args[0])).await?;
            println!("[CLIENT] Avatar aggiornato: {}", upload.avatar_url);
        }
        _ => println!("[CLIENT] Sintassi comando non valida. /help per l'elenco."),
    }
    Ok(true)
}

fn parse_id(raw: &str) -> Result<i64, ClientError> {
    raw.parse().map_err(|_| ClientError::Protocol(format!("'{}' is not a valid id", raw)))
}
