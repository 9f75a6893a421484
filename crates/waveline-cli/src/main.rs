//! waveline - a terminal front end for your music streaming account.
//!
//! Connects through the service's browser consent page, keeps the session
//! across runs, and shows your home feed, library, search results, playlists
//! and artists as text. Player commands control whichever device is active.

mod render;

use std::io;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waveline_core::api::client::DEFAULT_MARKET;
use waveline_core::auth::fragment_of;
use waveline_core::models::SearchKind;
use waveline_core::{ApiClient, ApiError, AuthError, Config, Navigator, SessionManager};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// A terminal cannot be navigated, so the consent URL is handed to the user.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, url: &str) {
        println!("Open this address in your browser to connect your account:\n");
        println!("  {}\n", url);
        println!("After approving, copy the address your browser lands on and run:\n");
        println!("  waveline callback '<address>'");
    }

    fn clear_fragment(&self) {
        debug!("Redirect fragment consumed");
    }
}

#[derive(Parser)]
#[command(
    name = "waveline",
    version,
    about = "Browse and control your music from the terminal",
    arg_required_else_help = true,
    after_help = "Set WAVELINE_CLIENT_ID (and optionally WAVELINE_REDIRECT_URI) in the \
                  environment, a .env file, or ~/.config/waveline/config.json."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the consent page URL to connect your account
    Login,
    /// Finish login with the address you were redirected to
    Callback {
        /// Full redirect URL or just its fragment
        #[arg(value_name = "URL|FRAGMENT")]
        address: String,
    },
    /// Show whether you are logged in
    Status {
        #[arg(long, help = "Print the session snapshot as JSON")]
        json: bool,
    },
    /// Show your profile
    Whoami,
    /// Forget the stored session
    Logout,
    #[command(flatten)]
    Catalog(CatalogCommand),
}

/// Commands that need an authenticated API client.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum CatalogCommand {
    /// Recently played, featured playlists, new releases
    Home,
    /// Search tracks, artists, albums and playlists
    Search {
        #[arg(required = true, num_args = 1.., value_parser = NonEmptyStringValueParser::new())]
        query: Vec<String>,
    },
    /// Your playlists, liked songs and saved albums
    Library,
    /// Show a playlist
    Playlist {
        #[arg(value_parser = NonEmptyStringValueParser::new())]
        id: String,
    },
    /// Show an artist
    Artist {
        #[arg(value_parser = NonEmptyStringValueParser::new())]
        id: String,
    },
    /// Show what is playing
    NowPlaying,
    /// Resume playback
    Play,
    /// Pause playback
    Pause,
    /// Skip to the next track
    Next,
    /// Go back to the previous track
    #[command(name = "prev")]
    Previous,
    /// Set the volume of the active device
    Volume {
        #[arg(value_name = "0-100", value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
}

impl CatalogCommand {
    async fn execute(&self, api: &ApiClient) -> Result<String, ApiError> {
        match self {
            Self::Home => {
                let (featured, releases, categories, recent) = tokio::try_join!(
                    api.featured_playlists(),
                    api.new_releases(),
                    api.categories(),
                    api.recently_played(),
                )?;
                Ok(render::home(&featured, &releases, &categories, &recent))
            }
            Self::Search { query } => {
                let results = api.search(&query.join(" "), &SearchKind::ALL).await?;
                Ok(render::search(&results))
            }
            Self::Library => {
                let (playlists, tracks, albums) = tokio::try_join!(
                    api.user_playlists(),
                    api.saved_tracks(),
                    api.saved_albums(),
                )?;
                Ok(render::library(&playlists, &tracks, &albums))
            }
            Self::Playlist { id } => {
                let (playlist, items) = tokio::try_join!(api.playlist(id), api.playlist_items(id))?;
                Ok(render::playlist(&playlist, &items))
            }
            Self::Artist { id } => {
                let (artist, top, albums, related) = tokio::try_join!(
                    api.artist(id),
                    api.artist_top_tracks(id, DEFAULT_MARKET),
                    api.artist_albums(id),
                    api.related_artists(id),
                )?;
                Ok(render::artist(&artist, &top, &albums, &related))
            }
            Self::NowPlaying => {
                let state = api.playback_state().await?;
                Ok(render::now_playing(state.as_ref()))
            }
            Self::Play => api.resume().await.map(|_| "Resumed.".to_string()),
            Self::Pause => api.pause().await.map(|_| "Paused.".to_string()),
            Self::Next => api.skip_next().await.map(|_| "Skipped to next track.".to_string()),
            Self::Previous => api
                .skip_previous()
                .await
                .map(|_| "Back to previous track.".to_string()),
            Self::Volume { percent } => api
                .set_volume(*percent)
                .await
                .map(|_| format!("Volume set to {}%.", percent)),
        }
    }
}

/// Simplify common API errors for the user
fn user_message(error: &ApiError) -> String {
    match error {
        ApiError::RateLimited => "Server is busy. Please wait a moment and try again.".to_string(),
        ApiError::NetworkError(_) => "Network error. Check your connection.".to_string(),
        ApiError::NotFound(_) => "Not found. Check the id and try again.".to_string(),
        ApiError::ServerError(_) => "The service is having trouble. Try again later.".to_string(),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(auth_error) = e.downcast_ref::<AuthError>() {
                eprintln!();
                eprintln!("*** Configuration error ***");
                eprintln!("{}", auth_error);
                eprintln!();
                return ExitCode::from(2);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            let mut config = Config::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
    };

    let session = SessionManager::new(config.session_store()?, ApiClient::new()?);
    let state = session.restore();
    info!(?state, ?command, "Session restored");

    match command {
        Command::Login => {
            if session.is_authenticated() {
                println!("Already logged in; continuing will replace the current session.\n");
            }
            session.login(&config, &TerminalNavigator)?;
        }
        Command::Callback { address } => {
            if !session.handle_redirect_callback(fragment_of(&address), &TerminalNavigator) {
                println!("No access token found in that address.");
                return Ok(());
            }
            session.settle().await;
            println!("{}", render::session_status(&session.snapshot()));
        }
        Command::Status { json } => {
            session.settle().await;
            let snapshot = session.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", render::session_status(&snapshot));
            }
        }
        Command::Whoami => {
            session.settle().await;
            match session.user() {
                Some(user) if session.is_authenticated() => println!("{}", render::profile(&user)),
                _ => println!("{}", render::session_status(&session.snapshot())),
            }
        }
        Command::Logout => {
            session.logout();
            println!("Logged out.");
        }
        Command::Catalog(catalog) => {
            session.settle().await;
            run_catalog(&catalog, &session).await?;
        }
    }

    Ok(())
}

async fn run_catalog(command: &CatalogCommand, session: &SessionManager<ApiClient>) -> Result<()> {
    let Some(api) = session.api_client() else {
        println!("{}", render::session_status(&session.snapshot()));
        return Ok(());
    };

    match command.execute(&api).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) if session.handle_api_error(api.token().unwrap_or_default(), &e) => {
            println!("Session expired. Please log in again with `waveline login`.");
            Ok(())
        }
        Err(e) => Err(anyhow!(user_message(&e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("waveline").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_session_commands() {
        assert_eq!(parse(&["login"]).unwrap(), Command::Login);
        assert_eq!(parse(&["status", "--json"]).unwrap(), Command::Status { json: true });
        assert_eq!(
            parse(&["callback", "#access_token=abc&expires_in=3600"]).unwrap(),
            Command::Callback {
                address: "#access_token=abc&expires_in=3600".to_string()
            }
        );
        assert!(parse(&["callback"]).is_err());
    }

    #[test]
    fn test_parse_search_collects_words() {
        assert_eq!(
            parse(&["search", "daft", "punk"]).unwrap(),
            Command::Catalog(CatalogCommand::Search {
                query: vec!["daft".to_string(), "punk".to_string()]
            })
        );
        assert!(parse(&["search"]).is_err());
    }

    #[test]
    fn test_parse_volume_bounds() {
        assert_eq!(
            parse(&["volume", "40"]).unwrap(),
            Command::Catalog(CatalogCommand::Volume { percent: 40 })
        );
        assert!(parse(&["volume", "101"]).is_err());
        assert!(parse(&["volume", "loud"]).is_err());
    }

    #[test]
    fn test_parse_requires_ids() {
        assert!(parse(&["playlist"]).is_err());
        assert!(parse(&["playlist", ""]).is_err());
        assert_eq!(
            parse(&["artist", "0OdUWJ0sBjDrqHygGUXeCF"]).unwrap(),
            Command::Catalog(CatalogCommand::Artist {
                id: "0OdUWJ0sBjDrqHygGUXeCF".to_string()
            })
        );
    }

    #[test]
    fn test_parse_player_command_names() {
        assert_eq!(
            parse(&["now-playing"]).unwrap(),
            Command::Catalog(CatalogCommand::NowPlaying)
        );
        assert_eq!(parse(&["prev"]).unwrap(), Command::Catalog(CatalogCommand::Previous));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(parse(&["dance"]).is_err());
    }

    #[test]
    fn test_user_message_simplifies_errors() {
        assert!(user_message(&ApiError::RateLimited).contains("busy"));
        assert!(user_message(&ApiError::ServerError("500".into())).contains("trouble"));
    }
}
