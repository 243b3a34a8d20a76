//! Lemming - a paced command-line client for Lemmy
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lemming::{Config, Database, PostRef, Session};

/// Priority for requests a person is waiting on
const INTERACTIVE: lemming::Priority = 10;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args(std::env::args().skip(1).collect())? {
        Command::Get {
            path,
            query,
            instance,
        } => get_cli(&path, &query, instance.as_deref()).await,
        Command::Feed {
            instance,
            sort,
            limit,
        } => feed_cli(instance.as_deref(), sort, limit).await,
        Command::View { post_id, instance } => view_cli(post_id, instance.as_deref()).await,
        Command::Login { instance, token } => login(&instance, &token),
        Command::Logout { instance } => logout(&instance),
        Command::Prefs(action) => prefs(action),
        Command::Recent { limit } => recent(limit),
        Command::Config => show_config(),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get {
        path: String,
        query: Vec<(String, String)>,
        instance: Option<String>,
    },
    Feed {
        instance: Option<String>,
        sort: Option<String>,
        limit: Option<usize>,
    },
    View {
        post_id: i64,
        instance: Option<String>,
    },
    Login {
        instance: String,
        token: String,
    },
    Logout {
        instance: String,
    },
    Prefs(PrefsAction),
    Recent {
        limit: usize,
    },
    Config,
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
enum PrefsAction {
    List,
    Get(String),
    Set(String, String),
    Unset(String),
}

/// Value following `flag`, if the flag is present
fn flag_value(args: &[String], flag: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag || a == short)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args(args: Vec<String>) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "get" => {
            let path = rest
                .first()
                .filter(|p| p.starts_with('/'))
                .ok_or_else(|| anyhow!("Missing API path (e.g. /site)"))?
                .clone();

            let mut query = Vec::new();
            let mut i = 1;
            while i < rest.len() {
                if rest[i] == "--instance" || rest[i] == "-i" {
                    i += 2;
                    continue;
                }
                let (key, value) = rest[i]
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Expected key=value, got '{}'", rest[i]))?;
                query.push((key.to_string(), value.to_string()));
                i += 1;
            }

            Ok(Command::Get {
                path,
                query,
                instance: flag_value(rest, "--instance", "-i"),
            })
        }

        "feed" => Ok(Command::Feed {
            instance: flag_value(rest, "--instance", "-i"),
            sort: flag_value(rest, "--sort", "-s"),
            limit: flag_value(rest, "--limit", "-l").and_then(|s| s.parse().ok()),
        }),

        "view" => {
            let post_id = rest
                .first()
                .ok_or_else(|| anyhow!("Missing post id"))?
                .parse()
                .context("Post id must be a number")?;
            Ok(Command::View {
                post_id,
                instance: flag_value(rest, "--instance", "-i"),
            })
        }

        "login" => {
            let instance = rest
                .first()
                .ok_or_else(|| anyhow!("Missing instance (e.g. lemmy.ml)"))?
                .clone();
            let token = rest
                .get(1)
                .ok_or_else(|| anyhow!("Missing login token (JWT)"))?
                .clone();
            Ok(Command::Login { instance, token })
        }

        "logout" => {
            let instance = rest
                .first()
                .ok_or_else(|| anyhow!("Missing instance"))?
                .clone();
            Ok(Command::Logout { instance })
        }

        "prefs" => {
            let action = match (rest.first().map(String::as_str), rest.get(1), rest.get(2)) {
                (None | Some("list"), _, _) => PrefsAction::List,
                (Some("get"), Some(key), _) => PrefsAction::Get(key.clone()),
                (Some("set"), Some(key), Some(value)) => {
                    PrefsAction::Set(key.clone(), value.clone())
                }
                (Some("unset"), Some(key), _) => PrefsAction::Unset(key.clone()),
                _ => return Err(anyhow!("Usage: lemming prefs [get <key> | set <key> <value> | unset <key>]")),
            };
            Ok(Command::Prefs(action))
        }

        "recent" => {
            let limit = flag_value(rest, "--limit", "-l")
                .and_then(|s| s.parse().ok())
                .unwrap_or(20);
            Ok(Command::Recent { limit })
        }

        "config" => Ok(Command::Config),

        other => Err(anyhow!(
            "Unknown command: {other}\nRun 'lemming --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"Lemming - a paced command-line client for Lemmy

USAGE:
    lemming [COMMAND]

COMMANDS:
    get <path> [key=value ...]         Raw API GET, printed as JSON
      Options:
        -i, --instance <url>           Server to ask (default: config)
      Examples:
        lemming get /site
        lemming get /post/list sort=New limit=5 --instance beehaw.org

    feed [OPTIONS]                     List posts from the front page
      Options:
        -i, --instance <url>           Server to ask
        -s, --sort <sort>              Sort order (default: config)
        -l, --limit <n>                Number of posts (default: config)

    view <post_id> [OPTIONS]           Show a post and remember it
      Options:
        -i, --instance <url>           Server to ask

    login <instance> <jwt>             Store a login token for an instance
    logout <instance>                  Forget the token for an instance

    prefs                              List preferences
    prefs get <key>                    Show one preference
    prefs set <key> <value>            Set a preference
    prefs unset <key>                  Remove a preference

    recent [--limit <n>]               Recently viewed posts (default: 20)
    config                             Show effective configuration

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

ENVIRONMENT:
    RUST_LOG                           Log filter (default: warn)

CONFIG:
    {}
"#,
        config_path
    );
}

fn print_version() {
    println!("lemming {}", lemming::VERSION);
}

async fn get_cli(path: &str, query: &[(String, String)], instance: Option<&str>) -> Result<()> {
    let session = Session::open(Config::load()?)?;
    let client = session.client(instance)?;

    let query: Vec<(&str, &str)> = query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let result = client.get_with_priority(path, &query, INTERACTIVE).await;

    session.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn feed_cli(instance: Option<&str>, sort: Option<String>, limit: Option<usize>) -> Result<()> {
    let session = Session::open(Config::load()?)?;
    let client = session.client(instance)?;
    let feed = &session.config().feed;

    let sort = sort.unwrap_or_else(|| feed.default_sort.clone());
    let limit = limit.unwrap_or(feed.page_size).to_string();
    let query = [
        ("sort", sort.as_str()),
        ("type_", feed.default_listing.as_str()),
        ("limit", limit.as_str()),
    ];
    let result = client.get_with_priority("/post/list", &query, INTERACTIVE).await;
    session.shutdown().await;
    let page = result?;

    println!("\n{} · {}", client.host(), sort);
    println!("{}", "─".repeat(60));

    let posts = page["posts"].as_array().map(Vec::as_slice).unwrap_or_default();
    for post in posts {
        println!(
            "\n[{}] {}",
            post["post"]["id"],
            post["post"]["name"].as_str().unwrap_or("(untitled)")
        );
        println!(
            "c/{} · {} points · {} comments",
            post["community"]["name"].as_str().unwrap_or("?"),
            post["counts"]["score"],
            post["counts"]["comments"]
        );
    }

    Ok(())
}

async fn view_cli(post_id: i64, instance: Option<&str>) -> Result<()> {
    let session = Session::open(Config::load()?)?;
    let client = session.client(instance)?;

    let id = post_id.to_string();
    let result = client
        .get_with_priority("/post", &[("id", id.as_str())], INTERACTIVE)
        .await;

    if let Ok(post) = &result {
        let title = post
            .pointer("/post_view/post/name")
            .and_then(|v| v.as_str())
            .map(String::from);
        session
            .recent()
            .record(PostRef::new(client.host(), post_id), title);
    }

    session.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

fn login(instance: &str, token: &str) -> Result<()> {
    let store = lemming::auth::CredentialStore::open()?;
    store.store_token(instance, token)?;
    println!("✓ Token stored for {}", lemming::api::host_of(instance));
    Ok(())
}

fn logout(instance: &str) -> Result<()> {
    let store = lemming::auth::CredentialStore::open()?;
    let host = lemming::api::host_of(instance);
    if store.delete_token(instance)? {
        println!("✓ Logged out of {}", host);
    } else {
        println!("No token stored for {}", host);
    }
    Ok(())
}

fn prefs(action: PrefsAction) -> Result<()> {
    let db = Database::open()?;

    match action {
        PrefsAction::List => {
            let prefs = db.list_preferences()?;
            if prefs.is_empty() {
                println!("No preferences set.");
            }
            for pref in prefs {
                println!("{} = {}", pref.key, pref.value);
            }
        }
        PrefsAction::Get(key) => match db.get_preference(&key)? {
            Some(value) => println!("{}", value),
            None => return Err(anyhow!("Preference not set: {key}")),
        },
        PrefsAction::Set(key, value) => {
            db.set_preference(&key, &value)?;
            println!("✓ {} = {}", key, value);
        }
        PrefsAction::Unset(key) => {
            if db.delete_preference(&key)? {
                println!("✓ Removed {}", key);
            } else {
                println!("Preference not set: {}", key);
            }
        }
    }

    Ok(())
}

fn recent(limit: usize) -> Result<()> {
    let db = Database::open()?;
    let views = db.recent_views(limit)?;

    if views.is_empty() {
        println!("No recently viewed posts.");
        return Ok(());
    }

    for view in views {
        println!(
            "{}  {}  (x{})  {}",
            view.viewed_at.format("%Y-%m-%d %H:%M"),
            view.post,
            view.view_count,
            view.title.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let path = Config::default_path()?;
    let config = Config::load()?;

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_get_with_query_and_instance() {
        let command = parse_args(args("get /post/list sort=New --instance beehaw.org limit=5")).unwrap();
        assert_eq!(
            command,
            Command::Get {
                path: "/post/list".into(),
                query: vec![("sort".into(), "New".into()), ("limit".into(), "5".into())],
                instance: Some("beehaw.org".into()),
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_args(args("get site")).is_err());
        assert!(parse_args(args("get /site nope")).is_err());
        assert!(parse_args(args("view abc")).is_err());
        assert!(parse_args(args("login lemmy.ml")).is_err());
        assert!(parse_args(args("frobnicate")).is_err());
    }

    #[test]
    fn test_parse_prefs() {
        assert_eq!(parse_args(args("prefs")).unwrap(), Command::Prefs(PrefsAction::List));
        assert_eq!(
            parse_args(args("prefs set feed.sort Hot")).unwrap(),
            Command::Prefs(PrefsAction::Set("feed.sort".into(), "Hot".into()))
        );
        assert!(parse_args(args("prefs set feed.sort")).is_err());
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(parse_args(Vec::new()).unwrap(), Command::Help);
        assert_eq!(parse_args(args("recent")).unwrap(), Command::Recent { limit: 20 });
        assert_eq!(
            parse_args(args("feed -l 5")).unwrap(),
            Command::Feed {
                instance: None,
                sort: None,
                limit: Some(5)
            }
        );
    }
}
