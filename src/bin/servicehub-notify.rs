use clap::{Arg, Command};
use log::{error, info, warn};
use servicehub_client::config::ClientOptions;
use servicehub_client::ServiceHub;
use servicehub_realtime::{ChannelEvent, Notification, NOTIFICATIONS_PATH};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    pretty_env_logger::init();

    let matches = Command::new("servicehub-notify")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Signs in to ServiceHub and logs live notifications")
        .arg(
            Arg::new("email")
                .long("email")
                .env("SERVICEHUB_EMAIL")
                .takes_value(true)
                .help("Account email; skipped when a persisted session exists"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .env("SERVICEHUB_PASSWORD")
                .takes_value(true)
                .hide_env_values(true),
        )
        .arg(
            Arg::new("path")
                .long("path")
                .takes_value(true)
                .default_value(NOTIFICATIONS_PATH)
                .help("Channel path, e.g. ws/quotes/"),
        )
        .get_matches();

    if let Err(e) = run(
        matches.value_of("email"),
        matches.value_of("password"),
        matches.value_of("path").unwrap_or(NOTIFICATIONS_PATH),
    )
    .await
    {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    email: Option<&str>,
    password: Option<&str>,
    path: &str,
) -> Result<(), servicehub_client::error::Error> {
    let hub = ServiceHub::new(ClientOptions::from_env()?).await?;

    if !hub.auth().is_authenticated() {
        match (email, password) {
            (Some(email), Some(password)) => {
                hub.auth().login(email, password).await?;
                info!("Signed in as {}", email);
            }
            _ => {
                return Err(servicehub_client::error::Error::config(
                    "no session found; pass --email and --password",
                ))
            }
        }
    }

    let mut channel = hub.channel(path)?;
    info!("Listening on {}", channel.url());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = channel.next_event() => match event {
                Some(ChannelEvent::Message(value)) => match Notification::from_value(&value) {
                    Ok(Notification::Pong { .. }) => {}
                    Ok(notification) => info!("{}: {}", notification.kind(), value),
                    Err(e) => warn!("Unrecognised {}: {}", e, value),
                },
                Some(ChannelEvent::Exhausted { attempts }) => {
                    error!("Gave up after {} reconnect attempts", attempts);
                    break;
                }
                Some(other) => info!("{:?}", other),
                None => break,
            }
        }
    }

    channel.close_and_wait().await;
    Ok(())
}
